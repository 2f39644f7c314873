//! Recording fakes for the connection, registry and diagnostics seams.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use uuid::Uuid;

use crate::connection::{Connection, ConnectionError, UpstreamFactory};
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::protocol::{ClientIdentity, PacketMeta};
use crate::registry::{SessionRegistry, SessionTable};
use crate::session::{Session, SessionContext, SessionHandle, SessionId};

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Raw(Vec<u8>),
    Packet(PacketMeta, Value),
}

#[derive(Default)]
pub struct RecordingConnection {
    sent: Mutex<Vec<Sent>>,
    ended: Mutex<Vec<Option<String>>>,
}

impl RecordingConnection {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn ended(&self) -> Vec<Option<String>> {
        self.ended.lock().unwrap().clone()
    }
}

impl Connection for RecordingConnection {
    fn write_raw(&self, bytes: Vec<u8>) {
        self.sent.lock().unwrap().push(Sent::Raw(bytes));
    }

    fn write(&self, meta: &PacketMeta, fields: &Value) {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Packet(meta.clone(), fields.clone()));
    }

    fn end(&self, reason: Option<&str>) {
        self.ended.lock().unwrap().push(reason.map(str::to_string));
    }
}

pub struct FakeFactory {
    upstream: Arc<RecordingConnection>,
    opened: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl FakeFactory {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl UpstreamFactory for FakeFactory {
    fn open(&self, identity: &ClientIdentity) -> Result<Arc<dyn Connection>, ConnectionError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectionError::InvalidAddress("nowhere".into()));
        }
        self.opened.lock().unwrap().push(identity.username.clone());
        Ok(self.upstream.clone())
    }
}

#[derive(Default)]
pub struct RecordingRegistry {
    table: SessionTable,
    unregistered: Mutex<Vec<SessionId>>,
}

impl RecordingRegistry {
    pub fn contains(&self, id: SessionId) -> bool {
        self.table.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn unregistered(&self) -> Vec<SessionId> {
        self.unregistered.lock().unwrap().clone()
    }
}

impl SessionRegistry for RecordingRegistry {
    fn register(&self, id: SessionId, handle: SessionHandle) {
        self.table.register(id, handle);
    }

    fn unregister(&self, id: SessionId) {
        self.unregistered.lock().unwrap().push(id);
        self.table.unregister(id);
    }
}

#[derive(Default)]
pub struct RecordingDiagnostics {
    lines: Mutex<Vec<String>>,
}

impl RecordingDiagnostics {
    pub fn contains(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.contains(needle))
            .count()
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn record(&self, label: &str, event: &DiagnosticEvent<'_>) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("{} {}", label, event));
    }
}

pub struct Fixture {
    pub client: Arc<RecordingConnection>,
    pub upstream: Arc<RecordingConnection>,
    pub factory: FakeFactory,
    pub registry: Arc<RecordingRegistry>,
    pub diagnostics: Arc<RecordingDiagnostics>,
}

impl Fixture {
    pub fn context(&self) -> SessionContext {
        SessionContext {
            registry: self.registry.clone(),
            diagnostics: self.diagnostics.clone(),
        }
    }

    pub fn create(&self, id: SessionId) -> Result<Session, ConnectionError> {
        let identity = ClientIdentity {
            username: "Steve".into(),
            uuid: Uuid::new_v4(),
            protocol_version: 47,
        };
        Session::create(
            id,
            identity,
            self.client.clone(),
            &self.factory,
            &self.context(),
        )
    }
}

pub fn fixture() -> Fixture {
    let upstream = Arc::new(RecordingConnection::default());
    Fixture {
        client: Arc::new(RecordingConnection::default()),
        upstream: upstream.clone(),
        factory: FakeFactory {
            upstream,
            opened: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        },
        registry: Arc::new(RecordingRegistry::default()),
        diagnostics: Arc::new(RecordingDiagnostics::default()),
    }
}
