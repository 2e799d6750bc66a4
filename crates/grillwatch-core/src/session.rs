// ── Session manager ──
//
// Full lifecycle for one cloud account: restore diagnostics, log in,
// discover grills, and run one supervisor per grill. Token-expired
// failures get exactly one refresh and retry; a second rejection ends the
// session.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use secrecy::SecretString;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use grillwatch_api::{
    AuthErrorKind, AuthTokens, CloudClient, Credentials, GrillInfo, LoginSession, UserInfo,
};

use crate::activity::ActivityLog;
use crate::config::SessionConfig;
use crate::diagnostics::{DiagnosticsStore, GlobalCounter};
use crate::error::CoreError;
use crate::model::Device;
use crate::packet::PacketDecoder;
use crate::presence::{PresenceGate, PresenceOracle};
use crate::supervisor::{self, Connector, SupervisorContext, SupervisorHandle, TcpConnector};

// ── AuthApi ─────────────────────────────────────────────────────────

/// The cloud calls a session needs. Implemented by [`CloudClient`].
pub trait AuthApi: Send + Sync + 'static {
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<LoginSession, grillwatch_api::Error>> + Send;

    fn refresh_token(
        &self,
        tokens: &AuthTokens,
    ) -> impl Future<Output = Result<SecretString, grillwatch_api::Error>> + Send;

    fn list_grills(
        &self,
        token: &SecretString,
    ) -> impl Future<Output = Result<Vec<GrillInfo>, grillwatch_api::Error>> + Send;
}

impl AuthApi for CloudClient {
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<LoginSession, grillwatch_api::Error>> + Send {
        CloudClient::login(self, credentials)
    }

    fn refresh_token(
        &self,
        tokens: &AuthTokens,
    ) -> impl Future<Output = Result<SecretString, grillwatch_api::Error>> + Send {
        CloudClient::refresh_token(self, tokens)
    }

    fn list_grills(
        &self,
        token: &SecretString,
    ) -> impl Future<Output = Result<Vec<GrillInfo>, grillwatch_api::Error>> + Send {
        CloudClient::list_grills(self, token)
    }
}

// ── SessionManager ──────────────────────────────────────────────────

/// What a [`SessionManager::resync`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    /// Grills that appeared and got a new supervisor.
    pub added: Vec<String>,
    /// Grills that disappeared; their supervisors were stopped.
    pub removed: Vec<String>,
    /// Grills whose metadata and token were refreshed in place.
    pub updated: usize,
}

struct Running {
    handle: SupervisorHandle,
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

#[derive(Debug, Clone)]
struct AuthState {
    tokens: AuthTokens,
    user: Option<UserInfo>,
}

/// Owns the login session and every supervisor spawned from it.
///
/// Does NOT connect on construction; call [`start()`](Self::start).
pub struct SessionManager<A: AuthApi, C: Connector> {
    config: SessionConfig,
    api: A,
    connector: Arc<C>,
    diagnostics: Arc<DiagnosticsStore>,
    presence: Arc<PresenceGate>,
    activity: Arc<ActivityLog>,
    auth: tokio::sync::Mutex<Option<AuthState>>,
    running: Mutex<BTreeMap<String, Running>>,
    cancel: CancellationToken,
}

impl SessionManager<CloudClient, TcpConnector> {
    /// Wire the real REST client and TCP connector from `config`.
    pub fn connect(
        config: SessionConfig,
        diagnostics: Arc<DiagnosticsStore>,
        oracle: Arc<dyn PresenceOracle>,
    ) -> Result<Self, CoreError> {
        let api = CloudClient::new(&config.api_url, &config.transport)?;
        let connector = TcpConnector::new(config.stream.clone(), config.retry.connect_timeout);
        Ok(Self::new(config, api, connector, diagnostics, oracle))
    }
}

impl<A: AuthApi, C: Connector> SessionManager<A, C> {
    pub fn new(
        config: SessionConfig,
        api: A,
        connector: C,
        diagnostics: Arc<DiagnosticsStore>,
        oracle: Arc<dyn PresenceOracle>,
    ) -> Self {
        let activity = Arc::new(ActivityLog::new(config.activity_log));
        Self {
            config,
            api,
            connector: Arc::new(connector),
            diagnostics,
            presence: Arc::new(PresenceGate::new(oracle)),
            activity,
            auth: tokio::sync::Mutex::new(None),
            running: Mutex::new(BTreeMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsStore> {
        &self.diagnostics
    }

    /// Runtime tracker links. Changes apply on each grill's next attempt.
    pub fn presence(&self) -> &Arc<PresenceGate> {
        &self.presence
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    /// Account profile from the last login.
    pub async fn user(&self) -> Option<UserInfo> {
        self.auth.lock().await.as_ref().and_then(|a| a.user.clone())
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Restore diagnostics, log in, and start a supervisor per grill.
    ///
    /// Invalid credentials halt here and nothing is spawned.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.auth.lock().await.is_some() {
            return Err(CoreError::Internal("session already started".into()));
        }

        self.diagnostics.restore_once();

        let login = self.login().await?;
        *self.auth.lock().await = Some(AuthState {
            tokens: login.tokens,
            user: login.user,
        });

        // A failed listing leaves the manager unstarted so `start()` can be retried.
        let listed = async { Ok::<_, CoreError>((self.list_grills().await?, self.access_token().await?)) };
        let (grills, session_token) = match listed.await {
            Ok(listed) => listed,
            Err(e) => {
                *self.auth.lock().await = None;
                return Err(e);
            }
        };
        info!(count = grills.len(), "discovered grills");

        let mut running = self.lock_running();
        for info in &grills {
            if running.contains_key(&info.serial_number) {
                warn!(serial = %info.serial_number, "duplicate grill in list; ignoring");
                continue;
            }
            let device = Arc::new(Device::from_grill(info, &session_token));
            running.insert(info.serial_number.clone(), self.spawn_supervisor(device));
        }
        Ok(())
    }

    /// Re-list grills: refresh metadata and tokens in place, start
    /// supervisors for new grills, stop those that disappeared.
    pub async fn resync(&self) -> Result<ResyncSummary, CoreError> {
        let grills = self.list_grills().await?;
        let session_token = self.access_token().await?;

        let mut summary = ResyncSummary::default();
        let mut stopped = Vec::new();
        {
            let mut running = self.lock_running();
            let listed: HashSet<&str> = grills.iter().map(|g| g.serial_number.as_str()).collect();

            for info in &grills {
                if let Some(r) = running.get(&info.serial_number) {
                    r.handle.device().refresh_from(info, &session_token);
                    summary.updated += 1;
                } else {
                    let device = Arc::new(Device::from_grill(info, &session_token));
                    running.insert(info.serial_number.clone(), self.spawn_supervisor(device));
                    summary.added.push(info.serial_number.clone());
                }
            }

            let gone: Vec<String> = running
                .keys()
                .filter(|serial| !listed.contains(serial.as_str()))
                .cloned()
                .collect();
            for serial in gone {
                if let Some(r) = running.remove(&serial) {
                    info!(serial, "grill no longer listed; stopping supervisor");
                    self.presence.unlink(&serial);
                    r.cancel.cancel();
                    stopped.push(r.task);
                    summary.removed.push(serial);
                }
            }
        }

        join_all(stopped).await;
        debug!(?summary, "resync complete");
        Ok(summary)
    }

    /// Stop every supervisor and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let running = std::mem::take(&mut *self.lock_running());
        join_all(running.into_values().map(|r| r.task)).await;
        info!("session shut down");
    }

    // ── Supervisors ─────────────────────────────────────────────────

    /// Handles for every running supervisor, ordered by serial.
    pub fn supervisors(&self) -> Vec<SupervisorHandle> {
        self.lock_running()
            .values()
            .map(|r| r.handle.clone())
            .collect()
    }

    pub fn supervisor(&self, serial: &str) -> Option<SupervisorHandle> {
        self.lock_running().get(serial).map(|r| r.handle.clone())
    }

    /// Flip one grill's connection switch.
    pub fn set_enabled(&self, serial: &str, enabled: bool) -> Result<(), CoreError> {
        let handle = self
            .supervisor(serial)
            .ok_or_else(|| CoreError::UnknownDevice {
                serial: serial.to_owned(),
            })?;
        handle.set_enabled(enabled);
        Ok(())
    }

    fn spawn_supervisor(&self, device: Arc<Device>) -> Running {
        let serial = device.serial().to_owned();
        if let Some(tracker) = self.config.trackers.get(&serial) {
            self.presence.link(&serial, tracker);
        }

        let start_enabled = self
            .diagnostics
            .enabled(&serial)
            .unwrap_or(self.config.enable_new_devices);
        debug!(serial, start_enabled, "starting supervisor");

        let cancel = self.cancel.child_token();
        let ctx = SupervisorContext {
            device,
            connector: Arc::clone(&self.connector),
            diagnostics: Arc::clone(&self.diagnostics),
            presence: Arc::clone(&self.presence),
            activity: Arc::clone(&self.activity),
            policy: self.config.retry.clone(),
            decoder: PacketDecoder::new(self.config.decoder.clone()),
        };
        let (handle, task) = supervisor::spawn(ctx, start_enabled, cancel.clone());
        Running {
            handle,
            task,
            cancel,
        }
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Cloud calls ─────────────────────────────────────────────────

    async fn login(&self) -> Result<LoginSession, CoreError> {
        self.diagnostics.increment_global(GlobalCounter::LoginCalls);
        match self.api.login(&self.config.credentials).await {
            Ok(session) => {
                info!(email = %self.config.credentials.email, "logged in");
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "login failed");
                Err(e.into())
            }
        }
    }

    async fn list_grills(&self) -> Result<Vec<GrillInfo>, CoreError> {
        let api = &self.api;
        let diagnostics = &self.diagnostics;
        self.with_refresh(|token| async move {
            diagnostics.increment_global(GlobalCounter::GrillListCalls);
            api.list_grills(&token).await
        })
        .await
    }

    /// Run `call` with the current access token. A token-expired failure
    /// refreshes once and retries; a second one is fatal.
    async fn with_refresh<T, F, Fut>(&self, mut call: F) -> Result<T, CoreError>
    where
        F: FnMut(SecretString) -> Fut,
        Fut: Future<Output = Result<T, grillwatch_api::Error>>,
    {
        let mut refreshed = false;
        loop {
            let token = self.access_token().await?;
            match call(token).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_token_expired() && !refreshed => {
                    debug!("access token expired; refreshing");
                    refreshed = true;
                    self.refresh().await?;
                }
                Err(e) if e.is_token_expired() => {
                    warn!("token rejected again after refresh");
                    return Err(CoreError::SessionExpired);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Renew the access token and hand it to grills that subscribe with it.
    /// Falls back to a fresh login when the refresh itself is rejected.
    async fn refresh(&self) -> Result<(), CoreError> {
        let mut auth = self.auth.lock().await;
        let state = auth.as_mut().ok_or(CoreError::NotStarted)?;

        let access_token = match self.api.refresh_token(&state.tokens).await {
            Ok(token) => token,
            Err(e)
                if matches!(
                    e.auth_kind(),
                    Some(AuthErrorKind::InvalidCredentials | AuthErrorKind::TokenExpired)
                ) =>
            {
                debug!(error = %e, "refresh rejected; logging in again");
                let login = self.login().await?;
                state.user = login.user.or(state.user.take());
                state.tokens = login.tokens;
                state.tokens.access_token.clone()
            }
            Err(e) => return Err(e.into()),
        };
        state.tokens.access_token = access_token.clone();
        drop(auth);

        for handle in self.supervisors() {
            if handle.device().uses_session_token() {
                handle.device().renew_token(access_token.clone());
            }
        }
        info!("access token refreshed");
        Ok(())
    }

    async fn access_token(&self) -> Result<SecretString, CoreError> {
        self.auth
            .lock()
            .await
            .as_ref()
            .map(|a| a.tokens.access_token.clone())
            .ok_or(CoreError::NotStarted)
    }
}

impl<A: AuthApi, C: Connector> Drop for SessionManager<A, C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn join_all(tasks: impl IntoIterator<Item = JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "supervisor task ended abnormally");
        }
    }
}
