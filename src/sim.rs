//! In-process stand-ins for the host UI, its surfaces and the rendering engine.
//!
//! The simulated host materializes the primary surface on a scripted schedule
//! ([`PrimaryPlan`]), which is how the CLI and the tests drive the timing
//! behavior of the session. Surfaces come from a [`SurfaceFactory`]: either
//! [`RecordingSurface`]s that just record traffic, or [`ClientSurface`]s that
//! run a real [`SurfaceClient`] over a [`PagedEngine`] and talk back to the host
//! through the event channel in wire form.

use crate::client::engine::{EngineEvent, LoadTicket, RenderEngine, RenderError};
use crate::client::{ClientState, SurfaceClient, SurfaceRole, ViewState};
use crate::host::{DocumentPicker, HostEvent, HostSender};
use crate::protocol::{encode, HostMessage, SurfaceMessage};
use crate::surface::{Surface, SurfaceHost, SurfaceId};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A surface that records what it was sent.
pub struct RecordingSurface {
    id: SurfaceId,
    posted: Mutex<Vec<HostMessage>>,
    shows: AtomicUsize,
    disposed: AtomicBool,
    reject_posts: AtomicBool,
}

impl RecordingSurface {
    pub fn new(id: SurfaceId) -> Arc<Self> {
        Arc::new(Self {
            id,
            posted: Mutex::new(Vec::new()),
            shows: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            reject_posts: AtomicBool::new(false),
        })
    }

    pub fn posted(&self) -> Vec<HostMessage> {
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the `loadDocument` messages.
    pub fn loads(&self) -> Vec<HostMessage> {
        self.posted()
            .into_iter()
            .filter(|m| matches!(m, HostMessage::LoadDocument { .. }))
            .collect()
    }

    pub fn show_count(&self) -> usize {
        self.shows.load(Ordering::SeqCst)
    }

    /// Makes every later `post` fail, as if the surface's channel broke.
    pub fn set_reject_posts(&self, reject: bool) {
        self.reject_posts.store(reject, Ordering::SeqCst);
    }
}

impl Surface for RecordingSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn show(&self) -> Result<()> {
        self.shows.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn post(&self, message: HostMessage) -> Result<()> {
        if self.is_disposed() {
            bail!("{} is disposed", self.id);
        }
        if self.reject_posts.load(Ordering::SeqCst) {
            bail!("{} rejected {}", self.id, message.command());
        }
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// A rendering engine over a fixed number of pages.
///
/// Markers are `page-<n>`. Empty payloads are unreadable.
pub struct PagedEngine {
    pages: u32,
    events: mpsc::UnboundedSender<EngineEvent>,
    ticket: Option<LoadTicket>,
    page: u32,
}

const PAGES_PER_CHAPTER: u32 = 5;

impl PagedEngine {
    pub fn new(pages: u32, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            pages: pages.max(1),
            events,
            ticket: None,
            page: 0,
        }
    }

    pub fn marker(page: u32) -> String {
        format!("page-{}", page)
    }

    fn parse_marker(&self, marker: &str) -> Option<u32> {
        marker
            .strip_prefix("page-")
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|n| *n < self.pages)
    }

    fn relocate(&mut self, ticket: LoadTicket, page: u32) {
        self.page = page;
        let _ = self.events.send(EngineEvent::Relocated {
            ticket,
            marker: Self::marker(page),
            progress: Some((page + 1) as f32 / self.pages as f32),
            chapter: Some(format!("Chapter {}", page / PAGES_PER_CHAPTER + 1)),
        });
    }

    fn loaded(&self) -> Result<LoadTicket, RenderError> {
        self.ticket
            .ok_or_else(|| RenderError::Engine("no document loaded".to_string()))
    }
}

impl RenderEngine for PagedEngine {
    fn load(&mut self, ticket: LoadTicket, payload: &[u8]) -> Result<(), RenderError> {
        if payload.is_empty() {
            return Err(RenderError::Unreadable("empty payload".to_string()));
        }
        self.ticket = Some(ticket);
        self.page = 0;
        Ok(())
    }

    fn display(&mut self, ticket: LoadTicket, position: Option<&str>) -> Result<(), RenderError> {
        if self.ticket != Some(ticket) {
            return Err(RenderError::Engine(format!("{:?} is not loaded", ticket)));
        }
        let page = match position {
            Some(marker) => self
                .parse_marker(marker)
                .ok_or_else(|| RenderError::PositionRejected(marker.to_string()))?,
            None => 0,
        };
        let _ = self.events.send(EngineEvent::Rendered { ticket });
        self.relocate(ticket, page);
        Ok(())
    }

    fn next_page(&mut self) -> Result<(), RenderError> {
        let ticket = self.loaded()?;
        if self.page + 1 < self.pages {
            self.relocate(ticket, self.page + 1);
        }
        Ok(())
    }

    fn prev_page(&mut self) -> Result<(), RenderError> {
        let ticket = self.loaded()?;
        if self.page > 0 {
            self.relocate(ticket, self.page - 1);
        }
        Ok(())
    }

    fn unload(&mut self) {
        self.ticket = None;
        self.page = 0;
    }
}

/// A surface running a real client over a [`PagedEngine`].
///
/// Host messages are encoded and decoded on the way in; client messages are
/// encoded and sent to the host as [`HostEvent::RawSurface`].
pub struct ClientSurface {
    id: SurfaceId,
    client: Mutex<SurfaceClient<PagedEngine>>,
    host: HostSender,
    shows: AtomicUsize,
    disposed: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ClientSurface {
    /// Creates the surface and starts forwarding its engine's events.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(id: SurfaceId, pages: u32, host: HostSender) -> Arc<Self> {
        let role = if id.is_primary() {
            SurfaceRole::Primary
        } else {
            SurfaceRole::Secondary
        };
        let (engine_tx, mut engine_rx) = mpsc::unbounded_channel();
        let surface = Arc::new(Self {
            id,
            client: Mutex::new(SurfaceClient::new(role, PagedEngine::new(pages, engine_tx))),
            host,
            shows: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            pump: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&surface);
        let pump = tokio::spawn(async move {
            while let Some(event) = engine_rx.recv().await {
                let Some(surface) = weak.upgrade() else {
                    break;
                };
                let outbound = surface.lock_client().handle_engine_event(event);
                for message in outbound {
                    surface.send(message);
                }
            }
        });
        *surface.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);
        surface
    }

    pub fn state(&self) -> ClientState {
        self.lock_client().state().clone()
    }

    pub fn view(&self) -> ViewState {
        self.lock_client().view().clone()
    }

    pub fn show_count(&self) -> usize {
        self.shows.load(Ordering::SeqCst)
    }

    pub fn click_open(&self) {
        let message = self.lock_client().request_open();
        if let Some(message) = message {
            self.send(message);
        }
    }

    pub fn click_migrate(&self) {
        let message = self.lock_client().request_migration();
        if let Some(message) = message {
            self.send(message);
        }
    }

    pub fn click_retry(&self) {
        let message = self.lock_client().retry();
        if let Some(message) = message {
            self.send(message);
        }
    }

    pub fn next_page(&self) {
        self.lock_client().next_page();
    }

    pub fn prev_page(&self) {
        self.lock_client().prev_page();
    }

    /// The user closed the surface.
    pub fn close(&self) {
        self.dispose();
        if !self.id.is_primary() {
            let _ = self.host.send(HostEvent::SecondaryClosed(self.id));
        }
    }

    fn send(&self, message: SurfaceMessage) {
        if self.is_disposed() {
            return;
        }
        match encode(&message) {
            Ok(raw) => {
                let _ = self.host.send(HostEvent::RawSurface { from: self.id, raw });
            }
            Err(e) => tracing::warn!("Could not encode {}: {:#}", message.command(), e),
        }
    }

    fn lock_client(&self) -> std::sync::MutexGuard<'_, SurfaceClient<PagedEngine>> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Surface for ClientSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn show(&self) -> Result<()> {
        self.shows.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn post(&self, message: HostMessage) -> Result<()> {
        if self.is_disposed() {
            bail!("{} is disposed", self.id);
        }
        let raw = encode(&message)?;
        // Violations are the client's to log; the transport succeeded.
        let _ = self.lock_client().handle_raw(&raw);
        Ok(())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pump) = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take() {
            pump.abort();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Builds the surfaces the simulated host hands out.
pub trait SurfaceFactory: Send + Sync {
    fn create(&self, id: SurfaceId) -> Arc<dyn Surface>;
}

#[derive(Default)]
pub struct RecordingFactory {
    created: Mutex<Vec<Arc<RecordingSurface>>>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, id: SurfaceId) -> Option<Arc<RecordingSurface>> {
        self.created().into_iter().find(|s| s.id == id)
    }

    pub fn secondaries(&self) -> Vec<Arc<RecordingSurface>> {
        self.created()
            .into_iter()
            .filter(|s| !s.id.is_primary())
            .collect()
    }

    pub fn created(&self) -> Vec<Arc<RecordingSurface>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SurfaceFactory for RecordingFactory {
    fn create(&self, id: SurfaceId) -> Arc<dyn Surface> {
        let surface = RecordingSurface::new(id);
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&surface));
        surface
    }
}

pub struct ClientSurfaceFactory {
    pages: u32,
    host: HostSender,
    created: Mutex<Vec<Arc<ClientSurface>>>,
}

impl ClientSurfaceFactory {
    pub fn new(pages: u32, host: HostSender) -> Arc<Self> {
        Arc::new(Self {
            pages,
            host,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn get(&self, id: SurfaceId) -> Option<Arc<ClientSurface>> {
        self.created().into_iter().find(|s| s.id == id)
    }

    pub fn secondaries(&self) -> Vec<Arc<ClientSurface>> {
        self.created()
            .into_iter()
            .filter(|s| !s.id.is_primary())
            .collect()
    }

    pub fn created(&self) -> Vec<Arc<ClientSurface>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SurfaceFactory for ClientSurfaceFactory {
    fn create(&self, id: SurfaceId) -> Arc<dyn Surface> {
        let surface = ClientSurface::spawn(id, self.pages, self.host.clone());
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&surface));
        surface
    }
}

/// When the host UI gets around to creating the primary surface, per activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryPlan {
    Never,
    After(Duration),
}

type ResolveHook = Arc<dyn Fn(Arc<dyn Surface>) + Send + Sync>;

/// A host UI that creates the primary surface on a scripted schedule.
///
/// Each activation consumes the next plan (`Never` once the plans run out).
/// Once a primary is scheduled, later activations are no-ops.
pub struct SimulatedHost {
    factory: Arc<dyn SurfaceFactory>,
    plans: Mutex<VecDeque<PrimaryPlan>>,
    on_resolve: Mutex<Option<ResolveHook>>,
    activations: AtomicUsize,
    scheduled: AtomicBool,
    fail_secondary: AtomicBool,
    titles: Mutex<Vec<String>>,
}

impl SimulatedHost {
    pub fn new(
        factory: Arc<dyn SurfaceFactory>,
        plans: impl IntoIterator<Item = PrimaryPlan>,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            plans: Mutex::new(plans.into_iter().collect()),
            on_resolve: Mutex::new(None),
            activations: AtomicUsize::new(0),
            scheduled: AtomicBool::new(false),
            fail_secondary: AtomicBool::new(false),
            titles: Mutex::new(Vec::new()),
        })
    }

    /// Sets what happens when the primary surface materializes.
    pub fn on_resolve(&self, hook: impl Fn(Arc<dyn Surface>) + Send + Sync + 'static) {
        *self.on_resolve.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Routes the primary surface into a host runtime's event channel.
    pub fn resolve_into(&self, host: HostSender) {
        self.on_resolve(move |surface| {
            let _ = host.send(HostEvent::PrimaryResolved(surface));
        });
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn set_fail_secondary(&self, fail: bool) {
        self.fail_secondary.store(fail, Ordering::SeqCst);
    }

    /// Titles of the secondary surfaces created so far.
    pub fn secondary_titles(&self) -> Vec<String> {
        self.titles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SurfaceHost for SimulatedHost {
    async fn activate_primary(&self) -> Result<()> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if self.scheduled.load(Ordering::SeqCst) {
            return Ok(());
        }

        let plan = self
            .plans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(PrimaryPlan::Never);

        if let PrimaryPlan::After(delay) = plan {
            self.scheduled.store(true, Ordering::SeqCst);
            let factory = Arc::clone(&self.factory);
            let hook = self
                .on_resolve
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let surface = factory.create(SurfaceId::Primary);
                match hook {
                    Some(hook) => hook(surface),
                    None => tracing::warn!("Primary surface resolved with nobody listening"),
                }
            });
        }
        Ok(())
    }

    fn create_secondary(&self, id: SurfaceId, title: &str) -> Result<Arc<dyn Surface>> {
        if self.fail_secondary.load(Ordering::SeqCst) {
            bail!("cannot create {}", id);
        }
        self.titles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(title.to_string());
        Ok(self.factory.create(id))
    }
}

/// A file picker that always returns the same answer.
pub struct FixedPicker {
    choice: Option<PathBuf>,
}

impl FixedPicker {
    pub fn new(choice: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self { choice })
    }
}

#[async_trait]
impl DocumentPicker for FixedPicker {
    async fn pick(&self) -> Result<Option<PathBuf>> {
        Ok(self.choice.clone())
    }
}
