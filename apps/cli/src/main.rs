use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    AuthForm, AuthMode, AuthOutcome, ControllerSettings, GoTrueIdentityProvider,
    HttpPreferenceBackend, IdentityProvider, MissingIdentityProvider, NavigationController,
    NavigationEvent, QuestionnaireFlow,
};
use shared::domain::{GradeLevel, Screen, SkillLevel};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, DEFAULT_CONFIG_FILE};

/// How long navigation must stay quiet before a step counts as settled.
const QUIET_PERIOD: Duration = Duration::from_millis(400);
const STEP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "tatva", about = "Drive the space learning adventure navigation from a terminal")]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the app and report where navigation lands.
    Status,
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    SignUp {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long)]
        password: String,
    },
    /// Sign in and answer the questionnaire if the learner has not onboarded yet.
    Onboard {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        grade: String,
        #[arg(long = "subject", required = true)]
        subjects: Vec<String>,
        #[arg(long)]
        level: String,
    },
    Quiz {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        subject: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let settings = load_settings(&args.config)?;

    let identity_provider: Arc<dyn IdentityProvider> = match settings.identity_url.as_deref() {
        Some(url) => Arc::new(
            GoTrueIdentityProvider::new(url, settings.identity_anon_key.clone())
                .with_context(|| format!("invalid identity_url '{url}'"))?,
        ),
        None => {
            warn!("no identity_url configured; sign-in is unavailable");
            Arc::new(MissingIdentityProvider::default())
        }
    };
    let preference_backend = Arc::new(
        HttpPreferenceBackend::new(&settings.preference_backend_url).with_context(|| {
            format!(
                "invalid preference_backend_url '{}'",
                settings.preference_backend_url
            )
        })?,
    );

    let controller = NavigationController::new_with_settings(
        identity_provider,
        preference_backend,
        ControllerSettings {
            splash_duration: settings.splash_duration(),
        },
    );
    let mut events = controller.subscribe();

    controller.on_app_start().await;
    tokio::time::sleep(settings.splash_duration()).await;
    settle(&mut events).await;
    println!("Launched; screen={}", controller.screen().await);

    let result = run(&controller, &mut events, args.command).await;
    controller.shutdown().await;
    result
}

async fn run(
    controller: &Arc<NavigationController>,
    events: &mut broadcast::Receiver<NavigationEvent>,
    command: Command,
) -> Result<()> {
    match command {
        Command::Status => {}
        Command::SignIn { email, password } => {
            sign_in(controller, events, email, password).await?;
        }
        Command::SignUp {
            name,
            email,
            phone,
            password,
        } => {
            let form = AuthForm {
                name,
                email,
                phone,
                password,
            };
            authenticate(controller, events, AuthMode::SignUp, &form).await?;
        }
        Command::Onboard {
            email,
            password,
            grade,
            subjects,
            level,
        } => {
            sign_in(controller, events, email, password).await?;
            if controller.screen().await != Screen::Questionnaire {
                println!("Learner is already onboarded");
            } else {
                let name = controller.snapshot().await.display_name().to_string();
                let mut flow = QuestionnaireFlow::new(name);
                println!("{}", flow.prompt());
                let grade = GradeLevel::from_label(&grade)
                    .ok_or_else(|| anyhow!("unknown grade level '{grade}'"))?;
                flow.select_grade(grade)?;
                for subject in &subjects {
                    flow.toggle_subject(subject)?;
                }
                flow.continue_to_skill()?;
                let level = SkillLevel::from_id(&level)
                    .ok_or_else(|| anyhow!("unknown skill level '{level}'"))?;
                let preferences = flow.select_skill(level)?;
                println!("{}", flow.prompt());

                let submission = controller.submit_questionnaire(preferences).await;
                if !submission.persisted {
                    println!("Preferences could not be saved remotely; continuing locally");
                }
                settle(events).await;
            }
        }
        Command::Quiz {
            email,
            password,
            subject,
        } => {
            sign_in(controller, events, email, password).await?;
            let ack = controller.on_quiz_requested(&subject).await;
            println!(
                "Quiz for {} acknowledged; quizzes are not available yet (screen={})",
                ack.subject, ack.screen
            );
        }
    }

    let snapshot = controller.snapshot().await;
    println!(
        "Explorer: {}; screen={}",
        snapshot.display_name(),
        snapshot.screen
    );
    if let Some(preferences) = snapshot.preferences {
        let subjects: Vec<&str> = preferences.subjects.iter().map(String::as_str).collect();
        println!(
            "Grade: {}; level: {}; subjects: {}",
            preferences.grade_level.label(),
            preferences.skill_level.rank_label(),
            subjects.join(", ")
        );
    }
    Ok(())
}

async fn sign_in(
    controller: &Arc<NavigationController>,
    events: &mut broadcast::Receiver<NavigationEvent>,
    email: String,
    password: String,
) -> Result<()> {
    let form = AuthForm {
        email,
        password,
        ..AuthForm::default()
    };
    authenticate(controller, events, AuthMode::SignIn, &form).await
}

async fn authenticate(
    controller: &Arc<NavigationController>,
    events: &mut broadcast::Receiver<NavigationEvent>,
    mode: AuthMode,
    form: &AuthForm,
) -> Result<()> {
    match controller.submit_auth(mode, form).await {
        Ok(outcome) => {
            println!("{}", outcome.message());
            if let AuthOutcome::VerificationPending { email } = outcome {
                println!("Verification link sent to {email}");
            }
            settle(events).await;
            Ok(())
        }
        Err(err) => Err(anyhow!(err.user_message())),
    }
}

/// Prints screen changes until navigation goes quiet.
async fn settle(events: &mut broadcast::Receiver<NavigationEvent>) {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    loop {
        let quiet = tokio::time::timeout(QUIET_PERIOD, events.recv()).await;
        match quiet {
            Err(_) => return,
            Ok(Ok(NavigationEvent::ScreenChanged(transition))) => {
                info!(from = %transition.from, to = %transition.to, "screen changed");
                println!("-> {}", transition.to);
            }
            Ok(Ok(NavigationEvent::Updated(_))) => {}
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!(skipped, "missed navigation events");
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => return,
        }
        if tokio::time::Instant::now() >= deadline {
            return;
        }
    }
}
