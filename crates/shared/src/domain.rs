use std::{collections::BTreeSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);
    };
}

id_newtype!(UserId);

/// Fallback shown when an identity carries neither a name nor an email.
pub const DEFAULT_DISPLAY_NAME: &str = "Explorer";

/// Subjects offered by the onboarding questionnaire.
pub const SUBJECT_CATALOG: [&str; 6] = [
    "Science",
    "Mathematics",
    "English",
    "History",
    "Geography",
    "Computer Science",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    #[default]
    Splash,
    Auth,
    Questionnaire,
    Dashboard,
    Quiz,
}

impl Screen {
    pub fn as_str(self) -> &'static str {
        match self {
            Screen::Splash => "splash",
            Screen::Auth => "auth",
            Screen::Questionnaire => "questionnaire",
            Screen::Dashboard => "dashboard",
            Screen::Quiz => "quiz",
        }
    }

    /// Screens that may only be shown to a signed-in learner.
    pub fn requires_identity(self) -> bool {
        matches!(self, Screen::Questionnaire | Screen::Dashboard | Screen::Quiz)
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Identity {
    pub fn display_name(&self) -> &str {
        non_blank(self.name.as_deref())
            .or_else(|| non_blank(self.email.as_deref()))
            .unwrap_or(DEFAULT_DISPLAY_NAME)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub identity: Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GradeLevel {
    #[serde(rename = "1st - 3rd Grade")]
    Grades1To3,
    #[serde(rename = "4th - 6th Grade")]
    Grades4To6,
    #[serde(rename = "7th - 9th Grade")]
    Grades7To9,
    #[serde(rename = "10th - 12th Grade")]
    Grades10To12,
    #[serde(rename = "College")]
    College,
    #[serde(rename = "Adult Learner")]
    AdultLearner,
}

impl GradeLevel {
    pub const ALL: [GradeLevel; 6] = [
        GradeLevel::Grades1To3,
        GradeLevel::Grades4To6,
        GradeLevel::Grades7To9,
        GradeLevel::Grades10To12,
        GradeLevel::College,
        GradeLevel::AdultLearner,
    ];

    pub fn label(self) -> &'static str {
        match self {
            GradeLevel::Grades1To3 => "1st - 3rd Grade",
            GradeLevel::Grades4To6 => "4th - 6th Grade",
            GradeLevel::Grades7To9 => "7th - 9th Grade",
            GradeLevel::Grades10To12 => "10th - 12th Grade",
            GradeLevel::College => "College",
            GradeLevel::AdultLearner => "Adult Learner",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|grade| grade.label().eq_ignore_ascii_case(label))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl SkillLevel {
    pub const ALL: [SkillLevel; 3] = [
        SkillLevel::Beginner,
        SkillLevel::Intermediate,
        SkillLevel::Advanced,
    ];

    pub fn id(self) -> &'static str {
        match self {
            SkillLevel::Beginner => "beginner",
            SkillLevel::Intermediate => "intermediate",
            SkillLevel::Advanced => "advanced",
        }
    }

    /// Name shown to the learner; intermediate and advanced use mission ranks.
    pub fn rank_label(self) -> &'static str {
        match self {
            SkillLevel::Beginner => "Beginner",
            SkillLevel::Intermediate => "Explorer",
            SkillLevel::Advanced => "Space Captain",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.id().eq_ignore_ascii_case(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub grade_level: GradeLevel,
    pub subjects: BTreeSet<String>,
    pub skill_level: SkillLevel,
}

/// Looks up a catalog subject case-insensitively and returns its canonical spelling.
pub fn canonical_subject(name: &str) -> Option<&'static str> {
    let name = name.trim();
    SUBJECT_CATALOG
        .into_iter()
        .find(|subject| subject.eq_ignore_ascii_case(name))
}
