mod rule;

pub use rule::AutomationRule;
