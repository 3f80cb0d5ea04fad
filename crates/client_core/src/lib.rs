use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{Identity, Preferences, Screen, Session, DEFAULT_DISPLAY_NAME},
    error::{AuthError, PreferenceError, SubscriptionError},
    protocol::{SessionChange, SignUpMetadata, SignUpOutcome},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod auth_flow;
pub mod gotrue;
pub mod preference_backend;
pub mod questionnaire;

pub use auth_flow::{AuthForm, AuthMode, AuthOutcome};
pub use gotrue::GoTrueIdentityProvider;
pub use preference_backend::HttpPreferenceBackend;
pub use questionnaire::{QuestionnaireFlow, QuestionnaireStep};

/// How long the splash screen stays up before `on_splash_complete` fires.
pub const DEFAULT_SPLASH_DURATION: Duration = Duration::from_millis(3500);
const NAVIGATION_EVENT_CAPACITY: usize = 256;
const SESSION_CHANGE_CAPACITY: usize = 64;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Push channel of session changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignUpMetadata,
    ) -> Result<SignUpOutcome, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Identity provider used when none is configured: never signs anyone in.
pub struct MissingIdentityProvider {
    changes: broadcast::Sender<SessionChange>,
}

impl Default for MissingIdentityProvider {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(SESSION_CHANGE_CAPACITY);
        Self { changes }
    }
}

#[async_trait]
impl IdentityProvider for MissingIdentityProvider {
    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(None)
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<Session, AuthError> {
        Err(AuthError::Network("identity provider is unavailable".into()))
    }

    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        _metadata: SignUpMetadata,
    ) -> Result<SignUpOutcome, AuthError> {
        Err(AuthError::Network("identity provider is unavailable".into()))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

#[async_trait]
pub trait PreferenceBackend: Send + Sync {
    /// Returns `Ok(None)` when the learner has not completed onboarding yet.
    async fn fetch_preferences(&self, token: &str) -> Result<Option<Preferences>, PreferenceError>;
    async fn store_preferences(
        &self,
        token: &str,
        name: &str,
        preferences: &Preferences,
    ) -> Result<(), PreferenceError>;
}

pub struct MissingPreferenceBackend;

#[async_trait]
impl PreferenceBackend for MissingPreferenceBackend {
    async fn fetch_preferences(
        &self,
        _token: &str,
    ) -> Result<Option<Preferences>, PreferenceError> {
        Err(PreferenceError::MissingBackend)
    }

    async fn store_preferences(
        &self,
        _token: &str,
        _name: &str,
        _preferences: &Preferences,
    ) -> Result<(), PreferenceError> {
        Err(PreferenceError::MissingBackend)
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub splash_duration: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            splash_duration: DEFAULT_SPLASH_DURATION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenTransition {
    pub from: Screen,
    pub to: Screen,
}

/// Read-only copy of controller state handed to presentation surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationSnapshot {
    pub screen: Screen,
    pub identity: Option<Identity>,
    pub preferences: Option<Preferences>,
    pub loading: bool,
}

impl NavigationSnapshot {
    pub fn display_name(&self) -> &str {
        self.identity
            .as_ref()
            .map(Identity::display_name)
            .unwrap_or(DEFAULT_DISPLAY_NAME)
    }
}

#[derive(Debug, Clone)]
pub enum NavigationEvent {
    ScreenChanged(ScreenTransition),
    Updated(NavigationSnapshot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizRequestAck {
    pub subject: String,
    pub screen: Screen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionnaireSubmission {
    pub persisted: bool,
}

#[derive(Debug, Default)]
struct NavigationState {
    screen: Screen,
    session: Option<Session>,
    identity: Option<Identity>,
    preferences: Option<Preferences>,
    loading: bool,
    started: bool,
    /// Splash timer fired while the identity was still unresolved.
    splash_pending: bool,
    /// Bumped on every identity write; async results carry the value they started under.
    generation: u64,
    /// Outcome of the preference fetch for the current generation (true = preferences present).
    fetch_resolved: Option<bool>,
}

impl NavigationState {
    fn snapshot(&self) -> NavigationSnapshot {
        NavigationSnapshot {
            screen: self.screen,
            identity: self.identity.clone(),
            preferences: self.preferences.clone(),
            loading: self.loading,
        }
    }

    fn signed_in_destination(&self) -> Screen {
        if self.preferences.is_some() {
            Screen::Dashboard
        } else {
            Screen::Questionnaire
        }
    }

    fn move_to(&mut self, to: Screen) -> Option<ScreenTransition> {
        let from = self.screen;
        if from == to {
            return None;
        }
        if to.requires_identity() && self.identity.is_none() {
            warn!(from = %from, to = %to, "navigation: refusing signed-in screen without an identity");
            return None;
        }
        self.screen = to;
        Some(ScreenTransition { from, to })
    }

    fn complete_splash(&mut self) -> Option<ScreenTransition> {
        if self.screen != Screen::Splash {
            return None;
        }
        self.splash_pending = false;
        let to = if self.identity.is_some() {
            self.signed_in_destination()
        } else {
            Screen::Auth
        };
        self.move_to(to)
    }

    fn resolve_loading(&mut self) -> Option<ScreenTransition> {
        self.loading = false;
        if self.splash_pending {
            self.complete_splash()
        } else {
            None
        }
    }
}

#[derive(Default)]
struct ControllerTasks {
    subscription: Option<JoinHandle<()>>,
    session_pull: Option<JoinHandle<()>>,
    splash_timer: Option<JoinHandle<()>>,
    preference_fetch: Option<JoinHandle<()>>,
}

impl ControllerTasks {
    fn abort_all(&mut self) {
        for task in [
            self.subscription.take(),
            self.session_pull.take(),
            self.splash_timer.take(),
            self.preference_fetch.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

impl Drop for ControllerTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Owns the current screen and sequences it from identity, preference and
/// presentation-surface events.
pub struct NavigationController {
    identity_provider: Arc<dyn IdentityProvider>,
    preference_backend: Arc<dyn PreferenceBackend>,
    settings: ControllerSettings,
    state: Mutex<NavigationState>,
    tasks: Mutex<ControllerTasks>,
    events: broadcast::Sender<NavigationEvent>,
}

impl NavigationController {
    pub fn new(
        identity_provider: Arc<dyn IdentityProvider>,
        preference_backend: Arc<dyn PreferenceBackend>,
    ) -> Arc<Self> {
        Self::new_with_settings(
            identity_provider,
            preference_backend,
            ControllerSettings::default(),
        )
    }

    pub fn new_with_settings(
        identity_provider: Arc<dyn IdentityProvider>,
        preference_backend: Arc<dyn PreferenceBackend>,
        settings: ControllerSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(NAVIGATION_EVENT_CAPACITY);
        Arc::new(Self {
            identity_provider,
            preference_backend,
            settings,
            state: Mutex::new(NavigationState::default()),
            tasks: Mutex::new(ControllerTasks::default()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NavigationEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> NavigationSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn screen(&self) -> Screen {
        self.state.lock().await.screen
    }

    pub async fn on_app_start(self: &Arc<Self>) {
        let observed_generation = {
            let mut state = self.state.lock().await;
            if state.started {
                debug!("navigation: start requested twice; ignoring");
                return;
            }
            state.started = true;
            state.screen = Screen::Splash;
            state.loading = true;
            state.splash_pending = false;
            state.generation
        };
        info!(
            splash_ms = self.settings.splash_duration.as_millis() as u64,
            "navigation: app started"
        );

        // Subscribe before the pull so no push can fall between the two.
        let changes = self.identity_provider.subscribe();
        let subscription = tokio::spawn(Self::run_subscription(Arc::downgrade(self), changes));
        let session_pull = tokio::spawn(Self::run_session_pull(
            Arc::downgrade(self),
            Arc::clone(&self.identity_provider),
            observed_generation,
        ));
        let splash_timer = tokio::spawn(Self::run_splash_timer(
            Arc::downgrade(self),
            self.settings.splash_duration,
        ));

        {
            let mut tasks = self.tasks.lock().await;
            tasks.abort_all();
            tasks.subscription = Some(subscription);
            tasks.session_pull = Some(session_pull);
            tasks.splash_timer = Some(splash_timer);
        }

        let snapshot = self.snapshot().await;
        self.publish(None, snapshot);
    }

    pub async fn on_splash_complete(&self) {
        let (transition, snapshot) = {
            let mut state = self.state.lock().await;
            if state.screen != Screen::Splash {
                debug!(screen = %state.screen, "navigation: splash completion outside splash; ignoring");
                return;
            }
            if state.loading {
                debug!("navigation: identity unresolved; holding splash");
                state.splash_pending = true;
                return;
            }
            (state.complete_splash(), state.snapshot())
        };
        self.publish(transition, snapshot);
    }

    /// Applies an identity pushed by the provider (or `None` on sign-out).
    pub async fn on_identity_changed(self: &Arc<Self>, session: Option<Session>) {
        self.apply_identity(session, None).await;
    }

    pub async fn on_auth_submitted(&self, identity: Identity, is_signup: bool) {
        let (transition, snapshot, superseded) = {
            let mut state = self.state.lock().await;
            let same_user = state
                .identity
                .as_ref()
                .is_some_and(|current| current.user_id == identity.user_id);
            if !same_user {
                // A different learner supersedes any lookup started for the previous one.
                state.generation += 1;
                state.identity = Some(identity);
                state.session = None;
                state.preferences = None;
                state.fetch_resolved = None;
            }
            state.loading = false;
            state.splash_pending = false;
            let to = match state.fetch_resolved {
                Some(true) => Screen::Dashboard,
                Some(false) => Screen::Questionnaire,
                None if is_signup => Screen::Questionnaire,
                None => Screen::Dashboard,
            };
            debug!(
                is_signup,
                fetch_resolved = ?state.fetch_resolved,
                "navigation: auth submitted"
            );
            (state.move_to(to), state.snapshot(), !same_user)
        };
        if superseded {
            self.abort_preference_fetch().await;
            self.abort_session_pull().await;
        }
        self.publish(transition, snapshot);
    }

    pub async fn on_questionnaire_submitted(&self, preferences: Preferences) {
        let (transition, snapshot) = {
            let mut state = self.state.lock().await;
            if state.identity.is_none() {
                warn!("navigation: questionnaire submitted without an identity; ignoring");
                return;
            }
            // Locally submitted preferences supersede any fetch still in flight.
            state.generation += 1;
            state.fetch_resolved = Some(true);
            state.preferences = Some(preferences);
            (state.move_to(Screen::Dashboard), state.snapshot())
        };
        self.abort_preference_fetch().await;
        self.publish(transition, snapshot);
    }

    /// Quiz flow is not wired up yet; the request is only acknowledged.
    pub async fn on_quiz_requested(&self, subject: &str) -> QuizRequestAck {
        let screen = self.screen().await;
        info!(subject, screen = %screen, "navigation: quiz requested");
        QuizRequestAck {
            subject: subject.to_string(),
            screen,
        }
    }

    /// Runs the auth round-trip with the identity provider and advances on success.
    /// Failures are returned for display and leave the screen untouched.
    pub async fn submit_auth(
        &self,
        mode: AuthMode,
        form: &AuthForm,
    ) -> Result<AuthOutcome, AuthError> {
        let outcome = auth_flow::authenticate(self.identity_provider.as_ref(), mode, form)
            .await
            .inspect_err(|err| warn!(%err, mode = ?mode, "navigation: authentication failed"))?;
        if let AuthOutcome::Completed {
            identity,
            is_signup,
        } = &outcome
        {
            self.on_auth_submitted(identity.clone(), *is_signup).await;
        }
        Ok(outcome)
    }

    /// Persists questionnaire answers, then moves to the dashboard even if the store failed.
    pub async fn submit_questionnaire(&self, preferences: Preferences) -> QuestionnaireSubmission {
        let (token, name) = {
            let state = self.state.lock().await;
            let token = state.session.as_ref().map(|s| s.access_token.clone());
            let name = state
                .identity
                .as_ref()
                .map(|identity| identity.display_name().to_string())
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
            (token, name)
        };

        let persisted = match token {
            Some(token) => match self
                .preference_backend
                .store_preferences(&token, &name, &preferences)
                .await
            {
                Ok(()) => true,
                Err(err) => {
                    warn!(%err, "navigation: failed to persist preferences");
                    false
                }
            },
            None => {
                warn!("navigation: no session token; preferences kept locally only");
                false
            }
        };

        self.on_questionnaire_submitted(preferences).await;
        QuestionnaireSubmission { persisted }
    }

    /// Signs out through the provider; the provider's push drives the move to auth.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.identity_provider.sign_out().await
    }

    /// Unsubscribes from the provider and cancels timers and in-flight requests.
    pub async fn shutdown(&self) {
        self.tasks.lock().await.abort_all();
        let mut state = self.state.lock().await;
        state.started = false;
        state.generation += 1;
        info!("navigation: controller shut down");
    }

    async fn apply_identity(self: &Arc<Self>, session: Option<Session>, expected_generation: Option<u64>) {
        let (transition, snapshot, fetch) = {
            let mut state = self.state.lock().await;
            if let Some(expected) = expected_generation {
                if state.generation != expected {
                    debug!(
                        expected,
                        current = state.generation,
                        "navigation: dropping stale session lookup"
                    );
                    return;
                }
            }

            state.generation += 1;
            state.fetch_resolved = None;
            let fetch = match session {
                Some(session) => {
                    let switched_user = state
                        .identity
                        .as_ref()
                        .is_some_and(|current| current.user_id != session.identity.user_id);
                    if switched_user {
                        state.preferences = None;
                    }
                    let token = session.access_token.clone();
                    state.identity = Some(session.identity.clone());
                    state.session = Some(session);
                    Some((state.generation, token))
                }
                None => {
                    state.session = None;
                    state.identity = None;
                    state.preferences = None;
                    None
                }
            };

            let mut transition = state.resolve_loading();
            if fetch.is_none() && state.screen != Screen::Splash {
                transition = state.move_to(Screen::Auth).or(transition);
            }
            debug!(
                generation = state.generation,
                signed_in = fetch.is_some(),
                "navigation: identity applied"
            );
            (transition, state.snapshot(), fetch)
        };

        self.abort_preference_fetch().await;
        if let Some((generation, token)) = fetch {
            let task = tokio::spawn(Self::run_preference_fetch(
                Arc::downgrade(self),
                Arc::clone(&self.preference_backend),
                generation,
                token,
            ));
            self.tasks.lock().await.preference_fetch = Some(task);
        }
        self.publish(transition, snapshot);
    }

    async fn apply_fetch_result(
        &self,
        generation: u64,
        result: Result<Option<Preferences>, PreferenceError>,
    ) {
        let (transition, snapshot) = {
            let mut state = self.state.lock().await;
            if state.generation != generation || state.identity.is_none() {
                debug!(
                    generation,
                    current = state.generation,
                    "navigation: dropping superseded preference fetch"
                );
                return;
            }

            match result {
                Ok(preferences) => {
                    state.fetch_resolved = Some(preferences.is_some());
                    state.preferences = preferences;
                }
                Err(err) => {
                    warn!(%err, "navigation: preference fetch failed; falling back to questionnaire");
                    state.fetch_resolved = Some(false);
                }
            }

            let transition = if state.screen == Screen::Splash {
                // The splash decides once it completes.
                None
            } else if state.fetch_resolved == Some(true) {
                state.move_to(Screen::Dashboard)
            } else {
                state.move_to(Screen::Questionnaire)
            };
            (transition, state.snapshot())
        };
        self.publish(transition, snapshot);
    }

    async fn on_subscription_error(self: &Arc<Self>, err: SubscriptionError) {
        match err {
            SubscriptionError::Lagged { skipped } => {
                warn!(skipped, "navigation: identity subscription lagged; resyncing session");
            }
            SubscriptionError::Closed => {
                warn!("navigation: identity subscription closed; resyncing session");
            }
        }

        // Identity is unknown until the provider answers; it is not cleared.
        let (observed_generation, snapshot) = {
            let mut state = self.state.lock().await;
            state.loading = true;
            (state.generation, state.snapshot())
        };
        self.publish(None, snapshot);
        let task = tokio::spawn(Self::run_session_pull(
            Arc::downgrade(self),
            Arc::clone(&self.identity_provider),
            observed_generation,
        ));
        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.session_pull.replace(task) {
            previous.abort();
        }
    }

    async fn on_session_pull_failed(&self, err: AuthError, observed_generation: u64) {
        warn!(%err, "navigation: session lookup failed");
        let (transition, snapshot) = {
            let mut state = self.state.lock().await;
            if state.generation != observed_generation {
                return;
            }
            (state.resolve_loading(), state.snapshot())
        };
        self.publish(transition, snapshot);
    }

    async fn abort_session_pull(&self) {
        if let Some(task) = self.tasks.lock().await.session_pull.take() {
            task.abort();
        }
    }

    async fn abort_preference_fetch(&self) {
        if let Some(task) = self.tasks.lock().await.preference_fetch.take() {
            task.abort();
        }
    }

    fn publish(&self, transition: Option<ScreenTransition>, snapshot: NavigationSnapshot) {
        if let Some(transition) = transition {
            info!(
                from = %transition.from,
                to = %transition.to,
                "navigation: screen changed"
            );
            let _ = self.events.send(NavigationEvent::ScreenChanged(transition));
        }
        let _ = self.events.send(NavigationEvent::Updated(snapshot));
    }

    async fn run_subscription(
        controller: Weak<Self>,
        mut changes: broadcast::Receiver<SessionChange>,
    ) {
        loop {
            let received = changes.recv().await;
            let Some(controller) = controller.upgrade() else {
                return;
            };
            match received {
                Ok(change) => {
                    debug!(change = change.kind(), "navigation: session change pushed");
                    controller.on_identity_changed(change.into_session()).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    controller
                        .on_subscription_error(SubscriptionError::Lagged { skipped })
                        .await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    controller
                        .on_subscription_error(SubscriptionError::Closed)
                        .await;
                    return;
                }
            }
        }
    }

    async fn run_session_pull(
        controller: Weak<Self>,
        provider: Arc<dyn IdentityProvider>,
        observed_generation: u64,
    ) {
        let result = provider.current_session().await;
        let Some(controller) = controller.upgrade() else {
            return;
        };
        match result {
            Ok(session) => {
                controller
                    .apply_identity(session, Some(observed_generation))
                    .await
            }
            Err(err) => {
                controller
                    .on_session_pull_failed(err, observed_generation)
                    .await
            }
        }
    }

    async fn run_splash_timer(controller: Weak<Self>, duration: Duration) {
        tokio::time::sleep(duration).await;
        if let Some(controller) = controller.upgrade() {
            controller.on_splash_complete().await;
        }
    }

    async fn run_preference_fetch(
        controller: Weak<Self>,
        backend: Arc<dyn PreferenceBackend>,
        generation: u64,
        token: String,
    ) {
        let result = backend.fetch_preferences(&token).await;
        if let Some(controller) = controller.upgrade() {
            controller.apply_fetch_result(generation, result).await;
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
