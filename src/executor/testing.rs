//! Fakes for the capability traits, used by unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::process::ProcessInvocation;
use super::traits::{
    ExpressionResolver, ImageMetadata, ImageMetadataResolver, ProcessLauncher, ReportCollector,
    RunningProcess,
};
use crate::pipeline::{
    CollectionError, ExpressionError, ImageError, ProcessError, ReportDeclaration,
};

/// Ordered record of collaborator calls shared between fakes
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Expression resolver that returns its input or always fails
#[derive(Debug, Default)]
pub struct FakeExpressions {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeExpressions {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExpressionResolver for FakeExpressions {
    fn resolve(&self, raw: &str) -> Result<String, ExpressionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(ExpressionError::Malformed {
                offset: 0,
                fragment: raw.to_string(),
            })
        } else {
            Ok(raw.to_string())
        }
    }
}

#[derive(Debug, Default)]
struct ImageCall {
    step_id: String,
    image: String,
    secret: Option<String>,
}

/// Image lookup returning canned metadata
#[derive(Debug)]
pub struct FakeImages {
    metadata: Option<ImageMetadata>,
    calls: Mutex<Vec<ImageCall>>,
}

impl FakeImages {
    pub fn returning(metadata: ImageMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails every lookup with `ImageError::EmptyReference`
    pub fn failing() -> Self {
        Self {
            metadata: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_image(&self) -> Option<String> {
        self.calls.lock().last().map(|c| c.image.clone())
    }

    pub fn last_step_id(&self) -> Option<String> {
        self.calls.lock().last().map(|c| c.step_id.clone())
    }

    pub fn last_secret(&self) -> Option<String> {
        self.calls.lock().last().and_then(|c| c.secret.clone())
    }
}

#[async_trait]
impl ImageMetadataResolver for FakeImages {
    async fn lookup(
        &self,
        step_id: &str,
        image: &str,
        pull_secret: Option<&str>,
    ) -> Result<ImageMetadata, ImageError> {
        self.calls.lock().push(ImageCall {
            step_id: step_id.to_string(),
            image: image.to_string(),
            secret: pull_secret.map(ToString::to_string),
        });
        self.metadata.clone().ok_or(ImageError::EmptyReference)
    }
}

/// What a fake process does once started
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Exits 0 immediately
    Succeed,
    /// Exits with the given non-zero code immediately
    Exit(i32),
    /// Exits with `code` after `delay`
    ExitAfter(Duration, i32),
    /// Never exits on its own
    Hang,
    /// Fails to start
    FailStart,
}

/// Process launcher following a script of behaviors
///
/// Each start consumes the next behavior; the last one repeats.
#[derive(Debug)]
pub struct FakeLauncher {
    script: Mutex<VecDeque<Behavior>>,
    invocations: Mutex<Vec<ProcessInvocation>>,
    log: EventLog,
}

impl FakeLauncher {
    pub fn new(behavior: Behavior) -> Self {
        Self::scripted([behavior])
    }

    pub fn scripted(behaviors: impl IntoIterator<Item = Behavior>) -> Self {
        Self {
            script: Mutex::new(behaviors.into_iter().collect()),
            invocations: Mutex::new(Vec::new()),
            log: EventLog::default(),
        }
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn starts(&self) -> usize {
        self.invocations.lock().len()
    }

    pub fn invocations(&self) -> Vec<ProcessInvocation> {
        self.invocations.lock().clone()
    }

    fn next_behavior(&self) -> Behavior {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.pop_front().unwrap_or(Behavior::Succeed)
        } else {
            script.front().copied().unwrap_or(Behavior::Succeed)
        }
    }
}

impl ProcessLauncher for FakeLauncher {
    fn start(
        &self,
        invocation: ProcessInvocation,
    ) -> Result<Box<dyn RunningProcess>, ProcessError> {
        let behavior = self.next_behavior();
        let program = invocation.command().program().to_string();
        self.log.push(format!("start:{}", invocation.attempt()));
        self.invocations.lock().push(invocation);

        if let Behavior::FailStart = behavior {
            return Err(ProcessError::Start {
                program,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(Box::new(FakeProcess { behavior }))
    }
}

struct FakeProcess {
    behavior: Behavior,
}

fn exit(code: i32) -> Result<(), ProcessError> {
    if code == 0 {
        Ok(())
    } else {
        Err(ProcessError::Exit { code: Some(code) })
    }
}

#[async_trait]
impl RunningProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> Result<(), ProcessError> {
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Exit(code) => exit(code),
            Behavior::ExitAfter(delay, code) => {
                tokio::time::sleep(delay).await;
                exit(code)
            }
            Behavior::Hang | Behavior::FailStart => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.behavior = Behavior::Exit(137);
        Ok(())
    }
}

/// Report collector that counts calls and optionally fails
#[derive(Debug, Default)]
pub struct FakeReports {
    fail: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<ReportDeclaration>>>,
    log: EventLog,
}

impl FakeReports {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Vec<ReportDeclaration>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ReportCollector for FakeReports {
    async fn collect(
        &self,
        reports: &[ReportDeclaration],
        step_id: &str,
    ) -> Result<(), CollectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(reports.to_vec());
        self.log.push(format!("collect:{step_id}"));
        if self.fail {
            Err(CollectionError::Read {
                path: "reports/junit.xml".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        } else {
            Ok(())
        }
    }
}
