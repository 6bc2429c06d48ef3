pub mod session;
pub mod template;

pub use session::{Session, SessionStatus, StepResult, StepStatus, COMPLETE_SENTINEL};
pub use template::{OutputKind, Template, TemplateSource};
