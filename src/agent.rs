use async_trait::async_trait;
use serde_json::Value;
use std::env;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn, Level};

use crate::computer::{Computer, ComputerError, Environment, OperationRegistry};
use crate::cua::{ResponseBody, ResponseRequest, ToolSchema, Truncation};
use crate::items::{Action, ComputerScreenshot, Item, Params, SafetyCheck};
use crate::logging::{StepLogger, StepRecord};
use crate::policy::UrlPolicy;
use crate::safety::{DenyAll, SafetyGate};
use crate::screenshots::ScreenshotStore;

// ========================= Errors =========================

/// Everything that aborts a turn. Reaching the action ceiling is not an error.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no output from model: {0}")]
    MissingOutput(String),
    #[error("safety check failed: {0}. Cannot continue with unacknowledged safety checks.")]
    SafetyCheckDeclined(String),
    #[error("blocked url: {0}")]
    BlockedUrl(String),
    #[error("computer has no operation for action `{0}`")]
    UnknownAction(String),
    #[error("invalid arguments for `{name}`: {source}")]
    InvalidArguments {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("computer error: {0}")]
    Computer(#[from] ComputerError),
    #[error("service error: {0}")]
    Service(String),
    #[error("logging error: {0}")]
    Logging(String),
}

// ========================= Pluggable Subsystems =========================

#[async_trait]
pub trait ResponseService: Send + Sync {
    async fn create_response(&self, request: &ResponseRequest) -> Result<ResponseBody, AgentError>;
}

// ========================= Agent Core =========================

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub model: String,
    /// Echo messages and actions to stdout as they are dispatched.
    pub print_steps: bool,
    /// Function tools advertised next to the computer tool.
    pub tools: Vec<ToolSchema>,
    pub url_policy: UrlPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: env::var("OPENAI_CUA_MODEL").unwrap_or_else(|_| "computer-use-preview".into()),
            print_steps: true,
            tools: Vec::new(),
            url_policy: UrlPolicy::default(),
        }
    }
}

pub struct Agent<C, S, G>
where
    C: Computer,
    S: ResponseService,
    G: SafetyGate,
{
    computer: C,
    service: S,
    gate: G,
    operations: OperationRegistry<C>,
    cfg: AgentConfig,
    logger: Option<Arc<dyn StepLogger>>,
    screenshot_store: Option<Arc<dyn ScreenshotStore>>,
}

impl<C, S, G> Agent<C, S, G>
where
    C: Computer,
    S: ResponseService,
    G: SafetyGate,
{
    pub fn new(computer: C, service: S, gate: G, cfg: AgentConfig) -> Self {
        Self {
            operations: C::operations(),
            computer,
            service,
            gate,
            cfg,
            logger: None,
            screenshot_store: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn StepLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_screenshot_store(mut self, store: Arc<dyn ScreenshotStore>) -> Self {
        self.screenshot_store = Some(store);
        self
    }

    pub fn computer(&self) -> &C {
        &self.computer
    }

    /// Configured function tools followed by the computer tool sized to the surface.
    pub fn tools(&self) -> Vec<ToolSchema> {
        let (display_width, display_height) = self.computer.dimensions();
        let mut tools = self.cfg.tools.clone();
        tools.push(ToolSchema::ComputerUsePreview {
            display_width,
            display_height,
            environment: self.computer.environment(),
        });
        tools
    }

    /// Run one user turn: call the service, dispatch what it returns, and repeat until it
    /// answers with an assistant message or `max_actions` round-trips have been spent.
    /// Returns the items produced during the turn; `history` is not modified.
    pub async fn run_turn(
        &self,
        history: &[Item],
        prompt_id: Option<&str>,
        max_actions: Option<usize>,
    ) -> Result<Vec<Item>, AgentError> {
        let tools = self.tools();
        let mut new_items: Vec<Item> = Vec::new();
        let mut action_count = 0usize;

        loop {
            if new_items.last().is_some_and(Item::is_assistant_message) {
                info!(round_trips = action_count, "assistant responded");
                break;
            }

            if let Some(max) = max_actions {
                if action_count >= max {
                    info!(max_actions = max, "action ceiling reached");
                    let marker = Item::action_limit(max);
                    let follow_up = self.handle_item(&marker, prompt_id).await?;
                    new_items.push(marker);
                    new_items.extend(follow_up);
                    break;
                }
            }

            let input: Vec<Item> = history
                .iter()
                .chain(new_items.iter())
                .filter(|item| !item.is_local())
                .cloned()
                .collect();
            if tracing::enabled!(Level::DEBUG) {
                let sanitized: Vec<Value> = input.iter().map(Item::sanitized).collect();
                debug!(input = %serde_json::Value::Array(sanitized), "requesting response");
            }

            let request = ResponseRequest {
                model: self.cfg.model.clone(),
                input,
                tools: tools.clone(),
                truncation: Truncation::Auto,
            };
            let response = self.service.create_response(&request).await?;
            let Some(output) = response.output else {
                let reason = response
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no error reported".into());
                warn!(response_id = ?response.id, error = %reason, "response carried no output");
                return Err(AgentError::MissingOutput(reason));
            };
            debug!(response_id = ?response.id, items = output.len(), "response received");

            new_items.extend(output.iter().cloned());
            for item in &output {
                let follow_up = self.handle_item(item, prompt_id).await?;
                new_items.extend(follow_up);
            }

            // one per round-trip, however many calls the response carried
            action_count += 1;
        }

        Ok(new_items)
    }

    /// Dispatch a single item: run its side effects, log one step record, and return the
    /// items that must go back to the service.
    pub async fn handle_item(&self, item: &Item, prompt_id: Option<&str>) -> Result<Vec<Item>, AgentError> {
        let start = Instant::now();
        let mut record = StepRecord::new(prompt_id, item.kind());

        let output = match item {
            Item::Message { role, content, .. } | Item::ActionLimitReached { role, content } => {
                let text = content.text();
                if self.cfg.print_steps {
                    println!("{}", text);
                }
                info!(kind = item.kind(), role = ?role, "message");
                record.role = Some(*role);
                record.content = Some(content.clone());
                Vec::new()
            }
            Item::FunctionCall { name, arguments, call_id, .. } => {
                self.handle_function_call(name, arguments, call_id, &mut record).await?
            }
            Item::ComputerCall { call_id, action, pending_safety_checks, .. } => {
                self.handle_computer_call(call_id, action, pending_safety_checks, prompt_id, &mut record)
                    .await?
            }
            Item::Reasoning { summary, .. } => {
                record.summary = Some(summary.clone());
                Vec::new()
            }
            Item::FunctionCallOutput { .. } | Item::ComputerCallOutput { .. } | Item::Unknown(_) => {
                debug!(kind = item.kind(), "nothing to dispatch");
                Vec::new()
            }
        };

        record.duration = start.elapsed().as_secs_f64();
        if let Some(logger) = &self.logger {
            logger.log_step(&record).await?;
        }
        Ok(output)
    }

    async fn handle_function_call(
        &self,
        name: &str,
        arguments: &str,
        call_id: &str,
        record: &mut StepRecord,
    ) -> Result<Vec<Item>, AgentError> {
        let args: Params = serde_json::from_str(arguments).map_err(|source| AgentError::InvalidArguments {
            name: name.to_string(),
            source,
        })?;
        if self.cfg.print_steps {
            println!("{}({})", name, Value::Object(args.clone()));
        }

        match self.operations.invoke(&self.computer, name, args.clone()) {
            Some(call) => {
                call.await?;
                info!(function = name, "function call executed");
            }
            None => debug!(function = name, "no operation for function call, skipping"),
        }

        record.name = Some(name.to_string());
        record.arguments = Some(Value::Object(args));
        Ok(vec![Item::FunctionCallOutput {
            call_id: call_id.to_string(),
            output: "success".into(),
        }])
    }

    async fn handle_computer_call(
        &self,
        call_id: &str,
        action: &Action,
        pending_safety_checks: &[SafetyCheck],
        prompt_id: Option<&str>,
        record: &mut StepRecord,
    ) -> Result<Vec<Item>, AgentError> {
        if self.cfg.print_steps {
            println!("{}({})", action.name, Value::Object(action.params.clone()));
        }
        let call = self
            .operations
            .invoke(&self.computer, &action.name, action.params.clone())
            .ok_or_else(|| AgentError::UnknownAction(action.name.clone()))?;
        call.await?;

        let screenshot = self.computer.screenshot().await?;
        if let Some(store) = &self.screenshot_store {
            if let Err(err) = store.save(prompt_id, call_id, &screenshot).await {
                warn!(call_id, error = %err, "failed to store screenshot");
            }
        }

        for check in pending_safety_checks {
            if !self.gate.acknowledge(&check.message).await {
                warn!(call_id, check = %check.message, "safety check declined");
                return Err(AgentError::SafetyCheckDeclined(check.message.clone()));
            }
        }

        let mut output = ComputerScreenshot::png(&screenshot);
        if self.computer.environment() == Environment::Browser {
            match self.computer.browser() {
                Some(browser) => {
                    let current_url = browser.current_url().await?;
                    self.cfg.url_policy.check(&current_url)?;

                    let metadata = browser.page_metadata().await?.map(|mut m| {
                        if m.full_url.as_deref().map_or(true, str::is_empty) {
                            m.full_url = Some(current_url.clone());
                        }
                        m
                    });
                    let url = metadata
                        .as_ref()
                        .and_then(|m| m.full_url.clone())
                        .unwrap_or(current_url);
                    output.current_url = Some(url.clone());
                    output.page_metadata = metadata.clone();
                    record.current_url = Some(url);
                    record.page_metadata = metadata;
                }
                None => debug!("browser surface without introspection, url checks skipped"),
            }
        }
        info!(call_id, action = %action.name, url = ?output.current_url, "computer call executed");

        record.action = Some(action.clone());
        record.call_id = Some(call_id.to_string());
        record.screenshot = Some(screenshot);
        Ok(vec![Item::ComputerCallOutput {
            call_id: call_id.to_string(),
            acknowledged_safety_checks: pending_safety_checks.to_vec(),
            output,
        }])
    }
}

// ========================= Defaults =========================

impl<C: Computer, S: ResponseService> Agent<C, S, DenyAll> {
    /// Agent that declines every safety check and logs nowhere.
    pub fn with_defaults(computer: C, service: S, cfg: AgentConfig) -> Self {
        Self::new(computer, service, DenyAll, cfg)
    }
}
