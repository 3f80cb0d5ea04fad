//! Three-step onboarding questionnaire: grade, subjects, skill level.

use std::collections::BTreeSet;

use shared::{
    domain::{canonical_subject, GradeLevel, Preferences, SkillLevel},
    error::QuestionnaireError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionnaireStep {
    GradeLevel,
    Subjects,
    SkillLevel,
    Complete,
}

impl QuestionnaireStep {
    fn as_str(self) -> &'static str {
        match self {
            QuestionnaireStep::GradeLevel => "grade_level",
            QuestionnaireStep::Subjects => "subjects",
            QuestionnaireStep::SkillLevel => "skill_level",
            QuestionnaireStep::Complete => "complete",
        }
    }

    /// Zero-based position used by the progress dots.
    pub fn index(self) -> usize {
        match self {
            QuestionnaireStep::GradeLevel => 0,
            QuestionnaireStep::Subjects => 1,
            QuestionnaireStep::SkillLevel | QuestionnaireStep::Complete => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuestionnaireFlow {
    learner_name: String,
    step: QuestionnaireStep,
    grade_level: Option<GradeLevel>,
    subjects: BTreeSet<String>,
}

impl QuestionnaireFlow {
    pub fn new(learner_name: impl Into<String>) -> Self {
        Self {
            learner_name: learner_name.into(),
            step: QuestionnaireStep::GradeLevel,
            grade_level: None,
            subjects: BTreeSet::new(),
        }
    }

    pub fn step(&self) -> QuestionnaireStep {
        self.step
    }

    pub fn subjects(&self) -> &BTreeSet<String> {
        &self.subjects
    }

    pub fn prompt(&self) -> String {
        match self.step {
            QuestionnaireStep::GradeLevel => format!(
                "Hi {}! I need to know a bit about you to customize your cosmic learning experience!",
                self.learner_name
            ),
            QuestionnaireStep::Subjects => {
                "Perfect! Now, which subjects excite you the most? Pick as many as you like!"
                    .to_string()
            }
            QuestionnaireStep::SkillLevel => {
                "Great choices! Finally, what's your current skill level?".to_string()
            }
            QuestionnaireStep::Complete => {
                "Excellent! Your personalized space academy is ready. Let's begin the adventure!"
                    .to_string()
            }
        }
    }

    pub fn select_grade(&mut self, grade: GradeLevel) -> Result<(), QuestionnaireError> {
        self.expect_step(QuestionnaireStep::GradeLevel)?;
        self.grade_level = Some(grade);
        self.step = QuestionnaireStep::Subjects;
        Ok(())
    }

    /// Adds the subject if absent, removes it otherwise. Returns whether it is now selected.
    pub fn toggle_subject(&mut self, subject: &str) -> Result<bool, QuestionnaireError> {
        self.expect_step(QuestionnaireStep::Subjects)?;
        let subject = canonical_subject(subject)
            .ok_or_else(|| QuestionnaireError::UnknownSubject(subject.to_string()))?;
        if self.subjects.remove(subject) {
            Ok(false)
        } else {
            self.subjects.insert(subject.to_string());
            Ok(true)
        }
    }

    pub fn continue_to_skill(&mut self) -> Result<(), QuestionnaireError> {
        self.expect_step(QuestionnaireStep::Subjects)?;
        if self.subjects.is_empty() {
            return Err(QuestionnaireError::NoSubjectsSelected);
        }
        self.step = QuestionnaireStep::SkillLevel;
        Ok(())
    }

    pub fn select_skill(&mut self, level: SkillLevel) -> Result<Preferences, QuestionnaireError> {
        self.expect_step(QuestionnaireStep::SkillLevel)?;
        let grade_level = self.grade_level.ok_or(QuestionnaireError::WrongStep {
            expected: QuestionnaireStep::GradeLevel.as_str(),
            actual: self.step.as_str(),
        })?;
        self.step = QuestionnaireStep::Complete;
        Ok(Preferences {
            grade_level,
            subjects: self.subjects.clone(),
            skill_level: level,
        })
    }

    fn expect_step(&self, expected: QuestionnaireStep) -> Result<(), QuestionnaireError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(QuestionnaireError::WrongStep {
                expected: expected.as_str(),
                actual: self.step.as_str(),
            })
        }
    }
}

#[cfg(test)]
#[path = "tests/questionnaire_tests.rs"]
mod tests;
