//! Registers the rule-driven link policy with the session

use std::cell::RefCell;
use std::rc::Rc;

use tracing::info;

use super::Plugin;
use crate::object::Completion;
use crate::policy::ConfigPolicy;
use crate::session::Session;

#[derive(Default)]
pub struct ConfigPolicyPlugin {
    policy: RefCell<Option<Rc<ConfigPolicy>>>,
}

impl ConfigPolicyPlugin {
    pub const NAME: &'static str = "config-policy";

    pub fn build() -> Rc<dyn Plugin> {
        Rc::new(Self::default())
    }

    /// The registered policy while the plugin is active
    pub fn policy(&self) -> Option<Rc<ConfigPolicy>> {
        self.policy.borrow().clone()
    }
}

impl Plugin for ConfigPolicyPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn activate(self: Rc<Self>, session: &Session, done: Completion) {
        let config = session.config();
        let rules = Rc::new(config.rule_set());
        info!(rules = rules.len(), "loading link rules");

        let policy = ConfigPolicy::new(
            Rc::clone(session.remote()),
            session.collection().clone(),
            rules,
            config.policy.clone(),
        );
        session.policies().register(policy.clone());
        *self.policy.borrow_mut() = Some(policy);
        done.succeed();
    }

    fn deactivate(&self, session: &Session) {
        if self.policy.borrow_mut().take().is_some() {
            session.policies().unregister(ConfigPolicy::NAME);
        }
    }
}
