#![allow(dead_code)]

use async_trait::async_trait;
use glass_loop::{
    AgentConfig, AgentError, BrowserIntrospection, Computer, ComputerError, Environment, OperationFuture,
    OperationRegistry, PageMetadata, Params, ResponseBody, ResponseRequest, ResponseService, ScreenshotStore,
    StepLogger, StepRecord, UrlPolicy,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// 1x1 transparent PNG
pub const PIXEL: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mP8z/C/HwAF/gL+VkC4XAAAAABJRU5ErkJggg==";

pub fn quiet() -> AgentConfig {
    AgentConfig {
        model: "test-model".into(),
        print_steps: false,
        tools: Vec::new(),
        url_policy: UrlPolicy::default(),
    }
}

// ---------- surface ----------

pub struct FakeSurface {
    env: Environment,
    introspect: bool,
    url: String,
    metadata: Option<PageMetadata>,
    calls: Mutex<Vec<(String, Params)>>,
    screenshots: AtomicUsize,
}

impl FakeSurface {
    pub fn desktop() -> Self {
        Self {
            env: Environment::Linux,
            introspect: false,
            url: String::new(),
            metadata: None,
            calls: Mutex::new(Vec::new()),
            screenshots: AtomicUsize::new(0),
        }
    }

    pub fn browser(url: &str, metadata: Option<PageMetadata>) -> Self {
        Self {
            env: Environment::Browser,
            introspect: true,
            url: url.to_string(),
            metadata,
            ..Self::desktop()
        }
    }

    pub fn calls(&self) -> Vec<(String, Params)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }

    pub fn screenshots(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }

    pub fn touched(&self) -> bool {
        !self.calls.lock().unwrap().is_empty() || self.screenshots() > 0
    }

    fn record<'a>(&'a self, name: &str, params: Params) -> OperationFuture<'a> {
        self.calls.lock().unwrap().push((name.to_string(), params));
        Box::pin(async { Ok(()) })
    }
}

fn op_click<'a>(s: &'a FakeSurface, p: Params) -> OperationFuture<'a> {
    s.record("click", p)
}

fn op_type<'a>(s: &'a FakeSurface, p: Params) -> OperationFuture<'a> {
    s.record("type", p)
}

fn op_goto<'a>(s: &'a FakeSurface, p: Params) -> OperationFuture<'a> {
    s.record("goto", p)
}

#[async_trait]
impl Computer for FakeSurface {
    fn environment(&self) -> Environment {
        self.env
    }

    fn dimensions(&self) -> (u32, u32) {
        (1024, 768)
    }

    async fn screenshot(&self) -> Result<String, ComputerError> {
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(PIXEL.to_string())
    }

    fn operations() -> OperationRegistry<Self> {
        OperationRegistry::new()
            .register("click", op_click)
            .register("type", op_type)
            .register("goto", op_goto)
    }

    fn browser(&self) -> Option<&dyn BrowserIntrospection> {
        if self.introspect {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl BrowserIntrospection for FakeSurface {
    async fn current_url(&self) -> Result<String, ComputerError> {
        Ok(self.url.clone())
    }

    async fn page_metadata(&self) -> Result<Option<PageMetadata>, ComputerError> {
        Ok(self.metadata.clone())
    }
}

// ---------- service ----------

#[derive(Default)]
struct Script {
    responses: VecDeque<ResponseBody>,
    fallback: Option<ResponseBody>,
    requests: Vec<ResponseRequest>,
}

/// Replays canned responses and remembers every request.
#[derive(Clone, Default)]
pub struct ScriptedService {
    script: Arc<Mutex<Script>>,
}

impl ScriptedService {
    pub fn new(responses: Vec<Value>) -> Self {
        let script = Script {
            responses: responses
                .into_iter()
                .map(|v| serde_json::from_value(v).expect("valid response"))
                .collect(),
            ..Default::default()
        };
        Self { script: Arc::new(Mutex::new(script)) }
    }

    pub fn repeating(response: Value) -> Self {
        let script = Script {
            fallback: Some(serde_json::from_value(response).expect("valid response")),
            ..Default::default()
        };
        Self { script: Arc::new(Mutex::new(script)) }
    }

    pub fn requests(&self) -> Vec<ResponseRequest> {
        self.script.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl ResponseService for ScriptedService {
    async fn create_response(&self, request: &ResponseRequest) -> Result<ResponseBody, AgentError> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(request.clone());
        let next = script.responses.pop_front().or_else(|| script.fallback.clone());
        next.ok_or_else(|| AgentError::Service("script exhausted".into()))
    }
}

// ---------- logging ----------

#[derive(Default)]
pub struct RecordingLogger {
    records: Mutex<Vec<StepRecord>>,
}

impl RecordingLogger {
    pub fn records(&self) -> Vec<StepRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.item_type).collect()
    }
}

#[async_trait]
impl StepLogger for RecordingLogger {
    async fn new_prompt(&self, _text: &str) -> Result<String, AgentError> {
        Ok("prompt-1".into())
    }

    async fn log_step(&self, record: &StepRecord) -> Result<(), AgentError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn log_browser_state(&self, _event: &str, _metadata: &PageMetadata) -> Result<(), AgentError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingStore {
    pub saved: Mutex<Vec<(Option<String>, String)>>,
}

#[async_trait]
impl ScreenshotStore for RecordingStore {
    async fn save(&self, prompt_id: Option<&str>, call_id: &str, _image_base64: &str) -> Result<(), AgentError> {
        self.saved
            .lock()
            .unwrap()
            .push((prompt_id.map(str::to_string), call_id.to_string()));
        Ok(())
    }
}

// ---------- gates ----------

/// Gate that answers `answer` and remembers every message it was shown.
pub fn recording_gate(answer: bool) -> (impl Fn(&str) -> bool + Send + Sync, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let gate = move |message: &str| {
        sink.lock().unwrap().push(message.to_string());
        answer
    };
    (gate, seen)
}

// ---------- wire fixtures ----------

pub fn response(output: Vec<Value>) -> Value {
    json!({"id": "resp_test", "output": output})
}

pub fn assistant(text: &str) -> Value {
    json!({
        "type": "message",
        "id": "msg_1",
        "role": "assistant",
        "status": "completed",
        "content": [{"type": "output_text", "text": text, "annotations": []}]
    })
}

pub fn click_call(call_id: &str, x: i64, y: i64) -> Value {
    json!({
        "type": "computer_call",
        "id": format!("cu_{call_id}"),
        "call_id": call_id,
        "action": {"type": "click", "button": "left", "x": x, "y": y},
        "pending_safety_checks": [],
        "status": "completed"
    })
}

pub fn checked_call(call_id: &str, action: Value, messages: &[&str]) -> Value {
    let checks: Vec<Value> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| json!({"id": format!("sc_{i}"), "code": "malicious_instructions", "message": m}))
        .collect();
    json!({
        "type": "computer_call",
        "call_id": call_id,
        "action": action,
        "pending_safety_checks": checks
    })
}
