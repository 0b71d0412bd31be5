// Automation Engine
//
// Event-driven rule automation for the OpenOMS backend.
// Tenant rules bind a trigger event to conditions and actions.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod events;
pub mod executor;
pub mod value;

pub use actions::{Action, ActionKind, ActionOutcome};
pub use conditions::{evaluate_conditions, Condition, ConditionOperator, ConditionResult};
pub use engine::{test_rule, AutomationEngine, EngineError, EventSummary, RuleTestResult};
pub use events::{event_types, Event};
pub use executor::{ActionError, ActionExecutor, ActionHandler, LoggingActionHandler, WebhookActionHandler};
pub use value::{resolve_field, to_f64, EventData};
