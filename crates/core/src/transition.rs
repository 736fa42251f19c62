//! Multi-step asynchronous transitions
//!
//! A transition walks a caller-defined sequence of steps. The definition
//! decides the next step from the current one ([`TransitionDef::next_step`])
//! and performs it ([`TransitionDef::execute_step`]). A step finishes by
//! calling [`Transition::advance`] or [`Transition::return_error`], usually
//! from a callback fired much later.
//!
//! Returning the current step from `next_step` means "keep waiting": the
//! step is not executed again and the transition stays where it is until a
//! later `advance` finds a different answer.
//!
//! [`Step::None`] is both the implicit starting point and the success
//! terminal; [`Step::Error`] is the failure terminal. Once a transition has
//! reached either, further calls are ignored.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::signal::{HandlerId, Signal};

/// Position of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step<S> {
    /// Not started yet, or finished successfully
    None,
    /// Failed; executed once so the definition can roll back
    Error,
    Custom(S),
}

impl<S> Step<S> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::None | Step::Error)
    }
}

/// The goal-specific half of a transition
pub trait TransitionDef: Sized + 'static {
    type Step: Copy + Eq + Debug;

    /// Step following `step`. Must not have side effects.
    fn next_step(&self, step: Step<Self::Step>) -> Step<Self::Step>;

    /// Perform `step`. `Step::Error` is passed once on failure.
    fn execute_step(&self, transition: &Transition<Self>, step: Step<Self::Step>);
}

type OnComplete<D> = Box<dyn FnOnce(&Transition<D>, Result<()>)>;

struct TransitionState<S> {
    step: Step<S>,
    started: bool,
    completed: bool,
    error: Option<String>,
}

struct TransitionInner<D: TransitionDef> {
    def: D,
    state: RefCell<TransitionState<D::Step>>,
    on_complete: RefCell<Option<OnComplete<D>>>,
    completed: Signal<()>,
}

/// Shared handle to a running transition
pub struct Transition<D: TransitionDef>(Rc<TransitionInner<D>>);

impl<D: TransitionDef> Clone for Transition<D> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<D: TransitionDef> Transition<D> {
    /// Create a transition. Nothing runs until [`start`](Self::start).
    pub fn new(def: D, on_complete: impl FnOnce(&Transition<D>, Result<()>) + 'static) -> Self {
        Self(Rc::new(TransitionInner {
            def,
            state: RefCell::new(TransitionState {
                step: Step::None,
                started: false,
                completed: false,
                error: None,
            }),
            on_complete: RefCell::new(Some(Box::new(on_complete))),
            completed: Signal::new(),
        }))
    }

    /// Move to the definition's first step
    pub fn start(&self) {
        {
            let mut state = self.0.state.borrow_mut();
            if state.started {
                warn!("transition already started");
                return;
            }
            state.started = true;
        }
        self.advance();
    }

    /// Finish the current step and move on
    pub fn advance(&self) {
        let (current, has_error) = {
            let state = self.0.state.borrow();
            if state.completed {
                warn!(step = ?state.step, "advance on a finished transition");
                return;
            }
            if !state.started {
                warn!("advance before start");
                return;
            }
            (state.step, state.error.is_some())
        };

        let next = self.0.def.next_step(current);
        match next {
            Step::Error => {
                if !has_error {
                    self.return_error(Error::invariant("state machine error"));
                }
            }
            Step::None => {
                self.0.state.borrow_mut().step = Step::None;
                debug!("transition finished");
                self.finish(Ok(()));
            }
            next if next == current => {
                trace!(step = ?current, "waiting");
            }
            next => {
                trace!(from = ?current, to = ?next, "transition step");
                self.0.state.borrow_mut().step = next;
                self.0.def.execute_step(self, next);
            }
        }
    }

    /// Abort with `error`. The definition sees `Step::Error` once, then the
    /// completion callback receives the error.
    pub fn return_error(&self, error: Error) {
        {
            let mut state = self.0.state.borrow_mut();
            if state.completed {
                warn!(%error, "transition already finished, dropping error");
                return;
            }
            if let Some(previous) = &state.error {
                warn!(%previous, %error, "transition already failed, dropping error");
                return;
            }
            state.step = Step::Error;
            state.error = Some(error.to_string());
        }
        debug!(%error, "transition failed");
        self.0.def.execute_step(self, Step::Error);
        self.finish(Err(error));
    }

    fn finish(&self, result: Result<()>) {
        self.0.state.borrow_mut().completed = true;
        let on_complete = self.0.on_complete.borrow_mut().take();
        if let Some(on_complete) = on_complete {
            on_complete(self, result);
        }
        self.0.completed.emit(&());
    }

    /// Fires once after the completion callback, on success or failure
    pub fn connect_completed(&self, handler: impl Fn(&()) + 'static) -> HandlerId {
        self.0.completed.connect(handler)
    }

    pub fn step(&self) -> Step<D::Step> {
        self.0.state.borrow().step
    }

    pub fn is_completed(&self) -> bool {
        self.0.state.borrow().completed
    }

    pub fn had_error(&self) -> bool {
        self.0.state.borrow().step == Step::Error
    }

    /// Message of the error the transition failed with
    pub fn error_message(&self) -> Option<String> {
        self.0.state.borrow().error.clone()
    }

    pub fn definition(&self) -> &D {
        &self.0.def
    }
}

impl<D: TransitionDef> Debug for Transition<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state.borrow();
        f.debug_struct("Transition")
            .field("step", &state.step)
            .field("completed", &state.completed)
            .field("error", &state.error)
            .finish()
    }
}
