pub mod agent;
pub mod browser;
pub mod computer;
pub mod cua;
pub mod items;
pub mod logging;
pub mod policy;
pub mod safety;
pub mod screenshots;

pub use agent::{Agent, AgentConfig, AgentError, ResponseService};
pub use browser::{Browser, BrowserConfig, ChromiumComputer};
pub use computer::{
    BrowserIntrospection, Computer, ComputerError, Environment, OperationFuture, OperationRegistry, ParamsExt,
};
pub use cua::{CuaClient, CuaConfig, ResponseBody, ResponseRequest, ToolSchema, Truncation};
pub use items::{Action, ComputerScreenshot, Item, MessageContent, PageMetadata, Params, Role, SafetyCheck};
pub use logging::{JsonlLogger, StepLogger, StepRecord};
pub use policy::UrlPolicy;
pub use safety::{AcknowledgeAll, DenyAll, SafetyGate, StdinSafetyGate};
pub use screenshots::{DiskScreenshotStore, ScreenshotStore};
