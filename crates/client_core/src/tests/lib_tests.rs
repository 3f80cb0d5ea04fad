use super::*;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Mutex as StdMutex,
};

use shared::domain::{GradeLevel, SkillLevel, UserId};
use uuid::Uuid;

const SPLASH: Duration = Duration::from_millis(3500);

struct FakeIdentityProvider {
    changes: StdMutex<Option<broadcast::Sender<SessionChange>>>,
    current: Mutex<Option<Session>>,
    pull_delay: Duration,
    pull_fails: bool,
    sign_in_result: Mutex<Option<Result<Session, AuthError>>>,
    sign_up_result: Mutex<Option<Result<SignUpOutcome, AuthError>>>,
}

impl FakeIdentityProvider {
    fn new() -> Self {
        Self::with_capacity(16)
    }

    fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        Self {
            changes: StdMutex::new(Some(changes)),
            current: Mutex::new(None),
            pull_delay: Duration::ZERO,
            pull_fails: false,
            sign_in_result: Mutex::new(None),
            sign_up_result: Mutex::new(None),
        }
    }

    fn with_session(self, session: Session) -> Self {
        Self {
            current: Mutex::new(Some(session)),
            ..self
        }
    }

    fn with_pull_delay(self, pull_delay: Duration) -> Self {
        Self { pull_delay, ..self }
    }

    fn failing_pull(self) -> Self {
        Self {
            pull_fails: true,
            ..self
        }
    }

    async fn push(&self, change: SessionChange) {
        *self.current.lock().await = change.session().cloned();
        if let Some(changes) = self.changes.lock().expect("changes lock").as_ref() {
            let _ = changes.send(change);
        }
    }

    /// Drops the sender so every subscriber sees the stream close.
    fn close_stream(&self) {
        self.changes.lock().expect("changes lock").take();
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        match self.changes.lock().expect("changes lock").as_ref() {
            Some(changes) => changes.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        // Snapshot before the delay so a slow lookup returns what was true when it started.
        let current = self.current.lock().await.clone();
        tokio::time::sleep(self.pull_delay).await;
        if self.pull_fails {
            return Err(AuthError::Network("session lookup timed out".into()));
        }
        Ok(current)
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<Session, AuthError> {
        let result = self
            .sign_in_result
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| Err(AuthError::InvalidCredentials("Invalid login credentials".into())));
        if let Ok(session) = &result {
            self.push(SessionChange::SignedIn(session.clone())).await;
        }
        result
    }

    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        _metadata: SignUpMetadata,
    ) -> Result<SignUpOutcome, AuthError> {
        let result = self
            .sign_up_result
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| Err(AuthError::Rejected("User already registered".into())));
        if let Ok(SignUpOutcome::Session(session)) = &result {
            self.push(SessionChange::SignedIn(session.clone())).await;
        }
        result
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.push(SessionChange::SignedOut).await;
        Ok(())
    }
}

#[derive(Default)]
struct FakePreferenceBackend {
    stored: Mutex<HashMap<String, Preferences>>,
    delays: Mutex<HashMap<String, Duration>>,
    fail_fetch: bool,
    store_calls: Mutex<Vec<(String, String, Preferences)>>,
}

impl FakePreferenceBackend {
    fn failing() -> Self {
        Self {
            fail_fetch: true,
            ..Self::default()
        }
    }

    async fn with_stored(self, token: &str, preferences: Preferences) -> Self {
        self.stored.lock().await.insert(token.to_string(), preferences);
        self
    }

    async fn delay(&self, token: &str, delay: Duration) {
        self.delays.lock().await.insert(token.to_string(), delay);
    }
}

#[async_trait]
impl PreferenceBackend for FakePreferenceBackend {
    async fn fetch_preferences(&self, token: &str) -> Result<Option<Preferences>, PreferenceError> {
        let delay = self.delays.lock().await.get(token).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetch {
            return Err(PreferenceError::Transport("connection refused".into()));
        }
        Ok(self.stored.lock().await.get(token).cloned())
    }

    async fn store_preferences(
        &self,
        token: &str,
        name: &str,
        preferences: &Preferences,
    ) -> Result<(), PreferenceError> {
        self.store_calls
            .lock()
            .await
            .push((token.to_string(), name.to_string(), preferences.clone()));
        self.stored
            .lock()
            .await
            .insert(token.to_string(), preferences.clone());
        Ok(())
    }
}

fn identity(name: &str) -> Identity {
    Identity {
        user_id: UserId(Uuid::new_v4()),
        name: Some(name.to_string()),
        email: Some(format!("{}@tatva.test", name.to_ascii_lowercase())),
        phone: None,
    }
}

fn session(name: &str, token: &str) -> Session {
    Session {
        access_token: token.to_string(),
        refresh_token: None,
        expires_at: None,
        identity: identity(name),
    }
}

fn preferences() -> Preferences {
    Preferences {
        grade_level: GradeLevel::Grades7To9,
        subjects: BTreeSet::from(["Mathematics".to_string(), "Science".to_string()]),
        skill_level: SkillLevel::Intermediate,
    }
}

fn controller(
    provider: &Arc<FakeIdentityProvider>,
    backend: &Arc<FakePreferenceBackend>,
) -> Arc<NavigationController> {
    NavigationController::new_with_settings(
        provider.clone(),
        backend.clone(),
        ControllerSettings {
            splash_duration: SPLASH,
        },
    )
}

/// Lets every ready task run; the paused clock only moves once the runtime is idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn wait_past_splash() {
    tokio::time::sleep(SPLASH + Duration::from_millis(10)).await;
}

async fn signed_in_on_dashboard() -> (
    Arc<FakeIdentityProvider>,
    Arc<FakePreferenceBackend>,
    Arc<NavigationController>,
) {
    let provider = Arc::new(FakeIdentityProvider::new().with_session(session("Asha", "tok-asha")));
    let backend = Arc::new(
        FakePreferenceBackend::default()
            .with_stored("tok-asha", preferences())
            .await,
    );
    let controller = controller(&provider, &backend);
    controller.on_app_start().await;
    wait_past_splash().await;
    assert_eq!(controller.screen().await, Screen::Dashboard);
    (provider, backend, controller)
}

#[tokio::test(start_paused = true)]
async fn no_prior_session_lands_on_auth_after_splash() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    settle().await;
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.screen, Screen::Splash);
    assert!(!snapshot.loading);

    wait_past_splash().await;
    assert_eq!(controller.screen().await, Screen::Auth);
}

#[tokio::test(start_paused = true)]
async fn existing_session_with_preferences_reaches_dashboard_after_splash() {
    let provider = Arc::new(FakeIdentityProvider::new().with_session(session("Asha", "tok-asha")));
    let backend = Arc::new(
        FakePreferenceBackend::default()
            .with_stored("tok-asha", preferences())
            .await,
    );
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    settle().await;
    let before_splash = controller.snapshot().await;
    assert_eq!(before_splash.screen, Screen::Splash);
    assert_eq!(before_splash.preferences, Some(preferences()));
    assert_eq!(before_splash.display_name(), "Asha");

    wait_past_splash().await;
    assert_eq!(controller.screen().await, Screen::Dashboard);
}

#[tokio::test(start_paused = true)]
async fn existing_session_without_preferences_goes_to_questionnaire() {
    let provider = Arc::new(FakeIdentityProvider::new().with_session(session("Ravi", "tok-ravi")));
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    wait_past_splash().await;
    assert_eq!(controller.screen().await, Screen::Questionnaire);
}

#[tokio::test(start_paused = true)]
async fn signup_then_questionnaire_reaches_dashboard() {
    let controller = NavigationController::new(
        Arc::new(MissingIdentityProvider::default()),
        Arc::new(MissingPreferenceBackend),
    );

    controller.on_auth_submitted(identity("Meera"), true).await;
    assert_eq!(controller.screen().await, Screen::Questionnaire);

    controller.on_questionnaire_submitted(preferences()).await;
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.screen, Screen::Dashboard);
    assert_eq!(snapshot.preferences, Some(preferences()));
}

#[tokio::test(start_paused = true)]
async fn login_without_fetch_result_goes_to_dashboard() {
    let controller = NavigationController::new(
        Arc::new(MissingIdentityProvider::default()),
        Arc::new(MissingPreferenceBackend),
    );

    controller.on_auth_submitted(identity("Kabir"), false).await;
    assert_eq!(controller.screen().await, Screen::Dashboard);
}

#[tokio::test(start_paused = true)]
async fn identity_cleared_on_dashboard_returns_to_auth() {
    let (_provider, _backend, controller) = signed_in_on_dashboard().await;

    controller.on_identity_changed(None).await;
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.screen, Screen::Auth);
    assert!(snapshot.preferences.is_none());
    assert!(snapshot.identity.is_none());
}

#[tokio::test(start_paused = true)]
async fn sign_out_push_returns_to_auth() {
    let (_provider, _backend, controller) = signed_in_on_dashboard().await;

    controller.sign_out().await.expect("sign out");
    settle().await;
    assert_eq!(controller.screen().await, Screen::Auth);
}

#[tokio::test(start_paused = true)]
async fn identity_cleared_during_splash_keeps_splash() {
    let provider = Arc::new(FakeIdentityProvider::new().with_session(session("Asha", "tok-asha")));
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    settle().await;
    provider.push(SessionChange::SignedOut).await;
    settle().await;
    assert_eq!(controller.screen().await, Screen::Splash);

    wait_past_splash().await;
    assert_eq!(controller.screen().await, Screen::Auth);
}

#[tokio::test(start_paused = true)]
async fn preference_fetch_failure_falls_back_to_questionnaire() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(FakePreferenceBackend::failing());
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    wait_past_splash().await;
    assert_eq!(controller.screen().await, Screen::Auth);

    provider
        .push(SessionChange::SignedIn(session("Ravi", "tok-ravi")))
        .await;
    settle().await;
    assert_eq!(controller.screen().await, Screen::Questionnaire);
}

#[tokio::test(start_paused = true)]
async fn stale_fetch_after_sign_out_is_ignored() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(
        FakePreferenceBackend::default()
            .with_stored("tok-slow", preferences())
            .await,
    );
    backend.delay("tok-slow", Duration::from_secs(1)).await;
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    wait_past_splash().await;

    controller
        .on_identity_changed(Some(session("Asha", "tok-slow")))
        .await;
    controller.on_identity_changed(None).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.screen, Screen::Auth);
    assert!(snapshot.preferences.is_none());
}

#[tokio::test(start_paused = true)]
async fn final_screen_follows_the_last_identity_event() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(
        FakePreferenceBackend::default()
            .with_stored("tok-first", preferences())
            .await,
    );
    backend.delay("tok-first", Duration::from_secs(1)).await;
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    wait_past_splash().await;

    controller
        .on_identity_changed(Some(session("First", "tok-first")))
        .await;
    controller
        .on_identity_changed(Some(session("Second", "tok-second")))
        .await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.screen, Screen::Questionnaire);
    assert!(snapshot.preferences.is_none());
    assert_eq!(snapshot.display_name(), "Second");
}

#[tokio::test(start_paused = true)]
async fn repeated_identity_change_is_idempotent() {
    let signed_in = session("Asha", "tok-asha");

    let once = {
        let (_provider, _backend, controller) = signed_in_on_dashboard().await;
        controller.on_identity_changed(Some(signed_in.clone())).await;
        settle().await;
        controller.snapshot().await
    };
    let twice = {
        let (_provider, _backend, controller) = signed_in_on_dashboard().await;
        controller.on_identity_changed(Some(signed_in.clone())).await;
        controller.on_identity_changed(Some(signed_in.clone())).await;
        settle().await;
        controller.snapshot().await
    };

    assert_eq!(once, twice);
    assert_eq!(twice.screen, Screen::Dashboard);
}

#[tokio::test(start_paused = true)]
async fn slow_startup_lookup_does_not_override_newer_push() {
    let provider = Arc::new(
        FakeIdentityProvider::new().with_pull_delay(Duration::from_millis(500)),
    );
    let backend = Arc::new(
        FakePreferenceBackend::default()
            .with_stored("tok-asha", preferences())
            .await,
    );
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    settle().await;
    provider
        .push(SessionChange::SignedIn(session("Asha", "tok-asha")))
        .await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.display_name(), "Asha");
    assert!(snapshot.preferences.is_some());

    wait_past_splash().await;
    assert_eq!(controller.screen().await, Screen::Dashboard);
}

#[tokio::test(start_paused = true)]
async fn splash_waits_for_unresolved_identity() {
    let provider = Arc::new(
        FakeIdentityProvider::new()
            .with_session(session("Asha", "tok-asha"))
            .with_pull_delay(Duration::from_secs(5)),
    );
    let backend = Arc::new(
        FakePreferenceBackend::default()
            .with_stored("tok-asha", preferences())
            .await,
    );
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    wait_past_splash().await;
    let held = controller.snapshot().await;
    assert_eq!(held.screen, Screen::Splash);
    assert!(held.loading);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(controller.screen().await, Screen::Dashboard);
}

#[tokio::test(start_paused = true)]
async fn failed_startup_lookup_treats_learner_as_signed_out() {
    let provider = Arc::new(FakeIdentityProvider::new().failing_pull());
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    wait_past_splash().await;
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.screen, Screen::Auth);
    assert!(!snapshot.loading);
}

#[tokio::test(start_paused = true)]
async fn lagged_subscription_resyncs_from_provider() {
    let provider = Arc::new(FakeIdentityProvider::with_capacity(1));
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    wait_past_splash().await;
    assert_eq!(controller.screen().await, Screen::Auth);

    provider
        .push(SessionChange::SignedIn(session("First", "tok-first")))
        .await;
    provider.push(SessionChange::SignedOut).await;
    provider
        .push(SessionChange::SignedIn(session("Latest", "tok-latest")))
        .await;
    settle().await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.display_name(), "Latest");
    assert_eq!(snapshot.screen, Screen::Questionnaire);
    assert!(!snapshot.loading);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_splash_timer() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    settle().await;
    controller.shutdown().await;
    tokio::time::sleep(SPLASH * 2).await;
    assert_eq!(controller.screen().await, Screen::Splash);

    provider
        .push(SessionChange::SignedIn(session("Asha", "tok-asha")))
        .await;
    settle().await;
    assert!(controller.snapshot().await.identity.is_none());
}

#[tokio::test(start_paused = true)]
async fn quiz_request_is_acknowledged_without_transition() {
    let (_provider, _backend, controller) = signed_in_on_dashboard().await;

    let ack = controller.on_quiz_requested("Science").await;
    assert_eq!(ack.subject, "Science");
    assert_eq!(ack.screen, Screen::Dashboard);
    assert_eq!(controller.screen().await, Screen::Dashboard);
}

#[tokio::test(start_paused = true)]
async fn local_questionnaire_submission_beats_pending_fetch() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(FakePreferenceBackend::default());
    backend.delay("tok-new", Duration::from_secs(1)).await;
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    wait_past_splash().await;
    controller
        .on_identity_changed(Some(session("Nia", "tok-new")))
        .await;
    controller.on_auth_submitted(identity("Nia"), true).await;
    controller.on_questionnaire_submitted(preferences()).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.screen, Screen::Dashboard);
    assert_eq!(snapshot.preferences, Some(preferences()));
}

#[tokio::test(start_paused = true)]
async fn questionnaire_submission_without_identity_is_ignored() {
    let controller = NavigationController::new(
        Arc::new(MissingIdentityProvider::default()),
        Arc::new(MissingPreferenceBackend),
    );

    controller.on_questionnaire_submitted(preferences()).await;
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.screen, Screen::Splash);
    assert!(snapshot.preferences.is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_sign_in_surfaces_message_and_stays_on_auth() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);
    controller.on_app_start().await;
    wait_past_splash().await;

    let form = AuthForm {
        email: "asha@tatva.test".into(),
        password: "wrong".into(),
        ..AuthForm::default()
    };
    let err = controller
        .submit_auth(AuthMode::SignIn, &form)
        .await
        .expect_err("sign in should fail");
    assert_eq!(err.user_message(), "Invalid login credentials");
    assert_eq!(controller.screen().await, Screen::Auth);
}

#[tokio::test(start_paused = true)]
async fn sign_in_defers_to_fetched_preferences() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);
    controller.on_app_start().await;
    wait_past_splash().await;

    *provider.sign_in_result.lock().await = Some(Ok(session("Kabir", "tok-kabir")));
    let form = AuthForm {
        email: "kabir@tatva.test".into(),
        password: "hunter22".into(),
        ..AuthForm::default()
    };
    let outcome = controller
        .submit_auth(AuthMode::SignIn, &form)
        .await
        .expect("sign in");
    assert!(matches!(
        outcome,
        AuthOutcome::Completed {
            is_signup: false,
            ..
        }
    ));
    settle().await;

    // No stored preferences: the fetch outcome wins over the login default.
    assert_eq!(controller.screen().await, Screen::Questionnaire);
}

#[tokio::test(start_paused = true)]
async fn sign_up_pending_verification_keeps_auth_screen() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);
    controller.on_app_start().await;
    wait_past_splash().await;

    *provider.sign_up_result.lock().await =
        Some(Ok(SignUpOutcome::VerificationPending(identity("Meera"))));
    let form = AuthForm {
        name: "Meera".into(),
        email: "meera@tatva.test".into(),
        phone: "+91 12345 67890".into(),
        password: "stardust".into(),
    };
    let outcome = controller
        .submit_auth(AuthMode::SignUp, &form)
        .await
        .expect("sign up");
    assert_eq!(
        outcome,
        AuthOutcome::VerificationPending {
            email: "meera@tatva.test".into()
        }
    );
    assert_eq!(controller.screen().await, Screen::Auth);
}

#[tokio::test(start_paused = true)]
async fn sign_up_requires_name() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);

    let form = AuthForm {
        email: "meera@tatva.test".into(),
        password: "stardust".into(),
        ..AuthForm::default()
    };
    let err = controller
        .submit_auth(AuthMode::SignUp, &form)
        .await
        .expect_err("missing name");
    assert_eq!(err, AuthError::Validation { field: "name" });
}

#[tokio::test(start_paused = true)]
async fn submit_questionnaire_persists_with_session_token() {
    let provider = Arc::new(FakeIdentityProvider::new().with_session(session("Ravi", "tok-ravi")));
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);
    controller.on_app_start().await;
    wait_past_splash().await;
    assert_eq!(controller.screen().await, Screen::Questionnaire);

    let submission = controller.submit_questionnaire(preferences()).await;
    assert!(submission.persisted);
    assert_eq!(controller.screen().await, Screen::Dashboard);

    let calls = backend.store_calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "tok-ravi");
    assert_eq!(calls[0].1, "Ravi");
}

#[tokio::test(start_paused = true)]
async fn submit_questionnaire_advances_even_when_store_fails() {
    let controller = NavigationController::new(
        Arc::new(MissingIdentityProvider::default()),
        Arc::new(MissingPreferenceBackend),
    );
    controller.on_auth_submitted(identity("Meera"), true).await;

    let submission = controller.submit_questionnaire(preferences()).await;
    assert!(!submission.persisted);
    assert_eq!(controller.screen().await, Screen::Dashboard);
}

#[tokio::test(start_paused = true)]
async fn screen_changes_are_broadcast() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);
    let mut events = controller.subscribe();

    controller.on_app_start().await;
    wait_past_splash().await;

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let NavigationEvent::ScreenChanged(transition) = event {
            transitions.push(transition);
        }
    }
    assert_eq!(
        transitions,
        vec![ScreenTransition {
            from: Screen::Splash,
            to: Screen::Auth,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn second_start_is_ignored() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    wait_past_splash().await;
    controller.on_app_start().await;
    settle().await;
    assert_eq!(controller.screen().await, Screen::Auth);
}

#[tokio::test(start_paused = true)]
async fn auth_as_another_learner_drops_previous_preferences() {
    let (_provider, _backend, controller) = signed_in_on_dashboard().await;

    controller.on_auth_submitted(identity("Kabir"), true).await;
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.screen, Screen::Questionnaire);
    assert!(snapshot.preferences.is_none());
    assert_eq!(snapshot.display_name(), "Kabir");
}

#[tokio::test(start_paused = true)]
async fn auth_for_new_learner_ignores_previous_learners_fetch() {
    let provider = Arc::new(FakeIdentityProvider::new());
    let backend = Arc::new(
        FakePreferenceBackend::default()
            .with_stored("tok-first", preferences())
            .await,
    );
    backend.delay("tok-first", Duration::from_secs(1)).await;
    let controller = controller(&provider, &backend);
    controller.on_app_start().await;
    wait_past_splash().await;

    controller
        .on_identity_changed(Some(session("First", "tok-first")))
        .await;
    controller.on_auth_submitted(identity("Second"), true).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.display_name(), "Second");
    assert_eq!(snapshot.screen, Screen::Questionnaire);
    assert!(snapshot.preferences.is_none());
}

#[tokio::test(start_paused = true)]
async fn slow_startup_lookup_does_not_clear_submitted_identity() {
    let provider = Arc::new(FakeIdentityProvider::new().with_pull_delay(Duration::from_secs(5)));
    let backend = Arc::new(FakePreferenceBackend::default());
    let controller = controller(&provider, &backend);

    controller.on_app_start().await;
    controller.on_auth_submitted(identity("Asha"), true).await;
    tokio::time::sleep(Duration::from_secs(6)).await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.display_name(), "Asha");
    assert_eq!(snapshot.screen, Screen::Questionnaire);
    assert!(!snapshot.loading);
}

#[tokio::test(start_paused = true)]
async fn closed_subscription_marks_identity_unknown_and_resyncs() {
    let provider = Arc::new(
        FakeIdentityProvider::new()
            .with_session(session("Asha", "tok-asha"))
            .with_pull_delay(Duration::from_secs(1)),
    );
    let backend = Arc::new(
        FakePreferenceBackend::default()
            .with_stored("tok-asha", preferences())
            .await,
    );
    let controller = controller(&provider, &backend);
    controller.on_app_start().await;
    wait_past_splash().await;
    assert_eq!(controller.screen().await, Screen::Dashboard);

    // The provider moved on without being able to tell us.
    *provider.current.lock().await = Some(session("Latest", "tok-latest"));
    provider.close_stream();
    settle().await;

    let unknown = controller.snapshot().await;
    assert!(unknown.loading);
    assert_eq!(unknown.display_name(), "Asha");
    assert_eq!(unknown.screen, Screen::Dashboard);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let resynced = controller.snapshot().await;
    assert!(!resynced.loading);
    assert_eq!(resynced.display_name(), "Latest");
    assert_eq!(resynced.screen, Screen::Questionnaire);
}

#[test]
fn signed_in_screens_need_an_identity() {
    let mut state = NavigationState::default();
    assert_eq!(state.move_to(Screen::Dashboard), None);
    assert_eq!(state.screen, Screen::Splash);

    assert_eq!(
        state.move_to(Screen::Auth),
        Some(ScreenTransition {
            from: Screen::Splash,
            to: Screen::Auth,
        })
    );
    state.identity = Some(identity("Asha"));
    assert!(state.move_to(Screen::Dashboard).is_some());
}
