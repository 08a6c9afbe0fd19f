use std::sync::{Arc, Mutex};
use std::time::Duration;

use assetdag::stage::{Stage, StageContext, StageFuture};

/// Shared log of stage invocations, in completion order.
pub type InvocationLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> InvocationLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of a log.
pub fn entries(log: &InvocationLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// A stage that records `"<task>:<label>"` into a shared log, optionally
/// after a delay, and optionally fails.
#[derive(Debug, Clone)]
pub struct FakeStage {
    label: String,
    log: InvocationLog,
    delay: Option<Duration>,
    fail_with: Option<String>,
}

impl FakeStage {
    pub fn new(label: &str, log: &InvocationLog) -> Self {
        Self {
            label: label.to_string(),
            log: Arc::clone(log),
            delay: None,
            fail_with: None,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, cause: &str) -> Self {
        self.fail_with = Some(cause.to_string());
        self
    }

    pub fn arc(self) -> Arc<dyn Stage> {
        Arc::new(self)
    }
}

impl Stage for FakeStage {
    fn describe(&self) -> String {
        format!("fake {}", self.label)
    }

    fn invoke<'a>(&'a self, ctx: &'a StageContext) -> StageFuture<'a> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let mut entry = format!("{}:{}", ctx.task, self.label);
            if let Some(inputs) = ctx.relative_inputs() {
                entry.push_str(&format!("[{}]", inputs.join(",")));
            }
            self.log.lock().unwrap().push(entry);

            match &self.fail_with {
                Some(cause) => Err(anyhow::anyhow!("{cause}")),
                None => Ok(()),
            }
        })
    }
}
