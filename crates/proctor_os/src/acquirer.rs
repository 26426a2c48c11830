#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use proctor_kernel_contracts::resource::{
    PermissionBundle, ResourceHandle, ResourceKind, ResourceState, RESOURCE_CONTRACT_VERSION,
};
use tokio::sync::{broadcast, watch};

use crate::host::{
    CapturedStream, HostCaptureError, HostMediaApi, MediaTrack, TrackKind, UserMediaRequest,
    VideoFrame,
};
use crate::lock_unpoisoned;

const LIVENESS_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted(ResourceHandle),
    /// A host request for this resource is already in flight.
    Pending(ResourceHandle),
    Denied(ResourceHandle),
}

impl AcquireOutcome {
    pub fn handle(&self) -> &ResourceHandle {
        match self {
            AcquireOutcome::Granted(h) | AcquireOutcome::Pending(h) | AcquireOutcome::Denied(h) => h,
        }
    }
}

#[derive(Debug)]
struct Slot {
    state: ResourceState,
    error_message: Option<String>,
    tracks: Vec<Arc<dyn MediaTrack>>,
    /// Bumped on every grant and release so stale liveness callbacks are ignored.
    generation: u64,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: ResourceState::Prompt,
            error_message: None,
            tracks: Vec::new(),
            generation: 0,
        }
    }

    fn handle(&self, kind: ResourceKind) -> ResourceHandle {
        let track_live =
            self.state == ResourceState::Granted && self.tracks.iter().any(|t| t.is_live());
        ResourceHandle {
            schema_version: RESOURCE_CONTRACT_VERSION,
            kind,
            state: self.state,
            error_message: self.error_message.clone(),
            track_live,
        }
    }
}

enum Begin {
    Existing(AcquireOutcome),
    Requested,
}

/// Sole owner of the revocable host resources. Other components read
/// handles or ask it to release; none of them hold raw tracks.
pub struct ResourceAcquirer {
    host: Arc<dyn HostMediaApi>,
    slots: Mutex<BTreeMap<ResourceKind, Slot>>,
    bundle_tx: watch::Sender<PermissionBundle>,
    liveness_tx: broadcast::Sender<ResourceKind>,
    me: Weak<ResourceAcquirer>,
}

impl std::fmt::Debug for ResourceAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAcquirer")
            .field("bundle", &self.bundle())
            .finish_non_exhaustive()
    }
}

impl ResourceAcquirer {
    pub fn new(host: Arc<dyn HostMediaApi>) -> Arc<Self> {
        let slots = ResourceKind::ALL
            .iter()
            .map(|k| (*k, Slot::new()))
            .collect::<BTreeMap<_, _>>();
        let (bundle_tx, _) = watch::channel(PermissionBundle::initial());
        let (liveness_tx, _) = broadcast::channel(LIVENESS_CHANNEL_CAPACITY);
        Arc::new_cyclic(|me| Self {
            host,
            slots: Mutex::new(slots),
            bundle_tx,
            liveness_tx,
            me: me.clone(),
        })
    }

    pub fn bundle(&self) -> PermissionBundle {
        let slots = lock_unpoisoned(&self.slots);
        bundle_from(&slots)
    }

    pub fn handle(&self, kind: ResourceKind) -> ResourceHandle {
        let slots = lock_unpoisoned(&self.slots);
        slots
            .get(&kind)
            .map(|s| s.handle(kind))
            .unwrap_or_else(|| ResourceHandle::prompt(kind))
    }

    pub fn watch_bundle(&self) -> watch::Receiver<PermissionBundle> {
        self.bundle_tx.subscribe()
    }

    /// Kinds whose granted tracks ended outside of `release`.
    pub fn on_liveness_lost(&self) -> broadcast::Receiver<ResourceKind> {
        self.liveness_tx.subscribe()
    }

    pub async fn acquire(&self, kind: ResourceKind) -> AcquireOutcome {
        match kind {
            ResourceKind::Camera => self.acquire_user_media(true, false).await.0,
            ResourceKind::Microphone => self.acquire_user_media(false, true).await.1,
            ResourceKind::ScreenShare => self.acquire_display().await,
            ResourceKind::Fullscreen => self.acquire_fullscreen().await,
        }
    }

    /// Camera and microphone through one combined host prompt, split into two
    /// independently owned handles.
    pub async fn acquire_camera_and_microphone(&self) -> (AcquireOutcome, AcquireOutcome) {
        self.acquire_user_media(true, true).await
    }

    async fn acquire_user_media(
        &self,
        want_camera: bool,
        want_microphone: bool,
    ) -> (AcquireOutcome, AcquireOutcome) {
        let camera = want_camera.then(|| self.begin(ResourceKind::Camera));
        let microphone = want_microphone.then(|| self.begin(ResourceKind::Microphone));
        let request_camera = matches!(camera, Some(Begin::Requested));
        let request_microphone = matches!(microphone, Some(Begin::Requested));

        if request_camera || request_microphone {
            self.publish();
            let result = self
                .host
                .capture_user_media(UserMediaRequest {
                    video: request_camera,
                    audio: request_microphone,
                })
                .await;
            match result {
                Ok(stream) => {
                    let (video, audio) = split_tracks(stream);
                    if request_camera {
                        self.commit_tracks(ResourceKind::Camera, video);
                    } else {
                        stop_all(&video);
                    }
                    if request_microphone {
                        self.commit_tracks(ResourceKind::Microphone, audio);
                    } else {
                        stop_all(&audio);
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "camera/microphone capture failed");
                    if request_camera {
                        self.commit_denied(ResourceKind::Camera, err.user_message(ResourceKind::Camera));
                    }
                    if request_microphone {
                        self.commit_denied(
                            ResourceKind::Microphone,
                            err.user_message(ResourceKind::Microphone),
                        );
                    }
                }
            }
        }

        (
            self.resolve(ResourceKind::Camera, camera),
            self.resolve(ResourceKind::Microphone, microphone),
        )
    }

    async fn acquire_display(&self) -> AcquireOutcome {
        let kind = ResourceKind::ScreenShare;
        if let Begin::Existing(outcome) = self.begin(kind) {
            return outcome;
        }
        self.publish();
        match self.host.capture_display().await {
            Ok(stream) => self.commit_tracks(kind, stream.tracks),
            Err(err) => {
                tracing::warn!(error = %err, "screen capture failed");
                self.commit_denied(kind, err.user_message(kind));
            }
        }
        self.resolve(kind, Some(Begin::Requested))
    }

    async fn acquire_fullscreen(&self) -> AcquireOutcome {
        let kind = ResourceKind::Fullscreen;
        if let Begin::Existing(outcome) = self.begin(kind) {
            return outcome;
        }
        self.publish();
        match self.host.request_fullscreen().await {
            Ok(()) => {
                let granted = {
                    let mut slots = lock_unpoisoned(&self.slots);
                    let slot = slots.entry(kind).or_insert_with(Slot::new);
                    if slot.state == ResourceState::Requesting {
                        slot.state = ResourceState::Granted;
                        slot.error_message = None;
                        slot.generation += 1;
                        true
                    } else {
                        false
                    }
                };
                if !granted {
                    // Released while the request was pending.
                    self.host.exit_fullscreen();
                }
                self.publish();
            }
            Err(err) => {
                tracing::warn!(error = %err, "fullscreen request failed");
                self.commit_denied(kind, err.user_message(kind));
            }
        }
        self.resolve(kind, Some(Begin::Requested))
    }

    /// Granted returns the existing handle and requesting returns pending;
    /// otherwise the slot moves to requesting and the caller issues the host call.
    fn begin(&self, kind: ResourceKind) -> Begin {
        let mut slots = lock_unpoisoned(&self.slots);
        let slot = slots.entry(kind).or_insert_with(Slot::new);
        match slot.state {
            ResourceState::Granted => Begin::Existing(AcquireOutcome::Granted(slot.handle(kind))),
            ResourceState::Requesting => {
                tracing::debug!(resource = %kind, "acquire already in flight");
                Begin::Existing(AcquireOutcome::Pending(slot.handle(kind)))
            }
            ResourceState::Prompt | ResourceState::Denied => {
                slot.state = ResourceState::Requesting;
                slot.error_message = None;
                Begin::Requested
            }
        }
    }

    fn resolve(&self, kind: ResourceKind, begin: Option<Begin>) -> AcquireOutcome {
        if let Some(Begin::Existing(outcome)) = begin {
            return outcome;
        }
        let handle = self.handle(kind);
        match handle.state {
            ResourceState::Granted => AcquireOutcome::Granted(handle),
            ResourceState::Requesting => AcquireOutcome::Pending(handle),
            ResourceState::Prompt | ResourceState::Denied => AcquireOutcome::Denied(handle),
        }
    }

    fn commit_tracks(&self, kind: ResourceKind, tracks: Vec<Arc<dyn MediaTrack>>) {
        if tracks.is_empty() {
            self.commit_denied(kind, format!("No {} was provided by the browser.", noun(kind)));
            return;
        }
        let generation = {
            let mut slots = lock_unpoisoned(&self.slots);
            let slot = slots.entry(kind).or_insert_with(Slot::new);
            if slot.state != ResourceState::Requesting {
                None
            } else {
                slot.generation += 1;
                slot.state = ResourceState::Granted;
                slot.error_message = None;
                slot.tracks = tracks.clone();
                Some(slot.generation)
            }
        };
        let Some(generation) = generation else {
            tracing::debug!(resource = %kind, "released while pending; stopping late tracks");
            stop_all(&tracks);
            return;
        };
        // Registered after the lock is dropped: a host may fire the callback synchronously.
        for track in &tracks {
            let me = self.me.clone();
            track.on_ended(Box::new(move || {
                if let Some(acquirer) = me.upgrade() {
                    acquirer.handle_track_ended(kind, generation);
                }
            }));
        }
        tracing::info!(resource = %kind, "resource granted");
        self.publish();
    }

    fn commit_denied(&self, kind: ResourceKind, message: String) {
        {
            let mut slots = lock_unpoisoned(&self.slots);
            let slot = slots.entry(kind).or_insert_with(Slot::new);
            if slot.state != ResourceState::Requesting {
                return;
            }
            slot.state = ResourceState::Denied;
            slot.error_message = Some(message);
        }
        self.publish();
    }

    fn handle_track_ended(&self, kind: ResourceKind, generation: u64) {
        let stale = {
            let mut slots = lock_unpoisoned(&self.slots);
            let Some(slot) = slots.get_mut(&kind) else {
                return;
            };
            if slot.generation != generation || slot.state != ResourceState::Granted {
                return;
            }
            slot.state = ResourceState::Denied;
            slot.error_message = Some(revoked_message(kind));
            slot.generation += 1;
            std::mem::take(&mut slot.tracks)
        };
        stop_all(&stale);
        tracing::warn!(resource = %kind, "resource liveness lost");
        self.publish();
        let _ = self.liveness_tx.send(kind);
    }

    /// The user left fullscreen through the host. Returns whether the handle changed.
    pub fn mark_fullscreen_exited(&self) -> bool {
        let changed = {
            let mut slots = lock_unpoisoned(&self.slots);
            match slots.get_mut(&ResourceKind::Fullscreen) {
                Some(slot) if slot.state == ResourceState::Granted => {
                    slot.state = ResourceState::Denied;
                    slot.error_message = Some(revoked_message(ResourceKind::Fullscreen));
                    slot.generation += 1;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.publish();
        }
        changed
    }

    /// Resets denied handles so a retry starts from a clean state.
    pub fn clear_errors(&self, kinds: &[ResourceKind]) {
        {
            let mut slots = lock_unpoisoned(&self.slots);
            for kind in kinds {
                if let Some(slot) = slots.get_mut(kind) {
                    if slot.state == ResourceState::Denied {
                        slot.state = ResourceState::Prompt;
                        slot.error_message = None;
                    }
                }
            }
        }
        self.publish();
    }

    /// Stops all tracks and resets the handle. Safe on an already released handle.
    pub fn release(&self, kind: ResourceKind) {
        let (tracks, was_granted, changed) = {
            let mut slots = lock_unpoisoned(&self.slots);
            let slot = slots.entry(kind).or_insert_with(Slot::new);
            let changed = slot.state != ResourceState::Prompt
                || slot.error_message.is_some()
                || !slot.tracks.is_empty();
            let was_granted = slot.state == ResourceState::Granted;
            slot.state = ResourceState::Prompt;
            slot.error_message = None;
            slot.generation += 1;
            (std::mem::take(&mut slot.tracks), was_granted, changed)
        };
        if !changed {
            return;
        }
        stop_all(&tracks);
        if kind == ResourceKind::Fullscreen && was_granted {
            self.host.exit_fullscreen();
        }
        tracing::debug!(resource = %kind, "resource released");
        self.publish();
    }

    pub fn release_all(&self) {
        for kind in ResourceKind::ALL {
            self.release(kind);
        }
    }

    /// Current frame from the live camera track, if the camera is granted.
    pub fn camera_frame(&self) -> Option<VideoFrame> {
        let track = {
            let slots = lock_unpoisoned(&self.slots);
            let slot = slots.get(&ResourceKind::Camera)?;
            if slot.state != ResourceState::Granted {
                return None;
            }
            slot.tracks
                .iter()
                .find(|t| t.kind() == TrackKind::Video && t.is_live())
                .cloned()?
        };
        track.grab_frame()
    }

    fn publish(&self) {
        self.bundle_tx.send_replace(self.bundle());
    }
}

fn bundle_from(slots: &BTreeMap<ResourceKind, Slot>) -> PermissionBundle {
    let h = |k: ResourceKind| {
        slots
            .get(&k)
            .map(|s| s.handle(k))
            .unwrap_or_else(|| ResourceHandle::prompt(k))
    };
    PermissionBundle::from_handles(
        h(ResourceKind::Camera),
        h(ResourceKind::Microphone),
        h(ResourceKind::ScreenShare),
        h(ResourceKind::Fullscreen),
    )
}

fn split_tracks(stream: CapturedStream) -> (Vec<Arc<dyn MediaTrack>>, Vec<Arc<dyn MediaTrack>>) {
    stream
        .tracks
        .into_iter()
        .partition(|t| t.kind() == TrackKind::Video)
}

fn stop_all(tracks: &[Arc<dyn MediaTrack>]) {
    for t in tracks {
        t.stop();
    }
}

fn noun(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Camera => "camera",
        ResourceKind::Microphone => "microphone",
        ResourceKind::ScreenShare => "shared screen",
        ResourceKind::Fullscreen => "fullscreen display",
    }
}

fn revoked_message(kind: ResourceKind) -> String {
    match kind {
        ResourceKind::Camera => "The camera was disconnected. Re-enable it to continue.",
        ResourceKind::Microphone => "The microphone was disconnected. Re-enable it to continue.",
        ResourceKind::ScreenShare => "Screen sharing was stopped. Share your screen again to continue.",
        ResourceKind::Fullscreen => "Fullscreen mode was exited. Return to fullscreen to continue.",
    }
    .to_string()
}
