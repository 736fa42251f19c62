//! Capability masks negotiated on managed objects
//!
//! A [`Features`] value is the unit of the augmentation protocol: callers
//! request a set, acquisition routines mark flags ready one at a time, and
//! the request completes once every wanted flag is present.
//!
//! `BOUND` precedes every other flag: nothing else can be acquired until the
//! object is attached to a live remote handle.

use bitflags::bitflags;

bitflags! {
    /// Capabilities a managed object can be asked to acquire
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u32 {
        /// Attached to a live remote handle
        const BOUND = 0b0000_0001;
        /// Remote info has been received and cached
        const INFO = 0b0000_0010;
        /// Remote parameters have been enumerated
        const PARAMS = 0b0000_0100;
    }
}

impl Features {
    /// The set most consumers want before using an object
    pub const STANDARD: Features = Features::BOUND.union(Features::INFO);

    /// Flags of `wanted` that are not yet present in `self`
    ///
    /// Computed as `(ready ^ wanted) & wanted`.
    pub fn missing_from(self, wanted: Features) -> Features {
        (self ^ wanted) & wanted
    }

    /// `true` when every flag of `wanted` is present
    pub fn satisfies(self, wanted: Features) -> bool {
        (self & wanted) == wanted
    }

    /// Add the prerequisite flags implied by a non-empty request
    ///
    /// Any request that is not already bound pulls in `BOUND`.
    pub fn with_prerequisites(self, bound: bool) -> Features {
        if !bound && !self.is_empty() {
            self | Features::BOUND
        } else {
            self
        }
    }

    /// Flags in acquisition order: `BOUND` first, then ascending bit order
    pub fn acquisition_order(self) -> impl Iterator<Item = Features> {
        let rest = self - Features::BOUND;
        let head = self
            .contains(Features::BOUND)
            .then_some(Features::BOUND)
            .into_iter();
        head.chain(rest.iter())
    }
}
