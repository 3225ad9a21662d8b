use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
    GradeLeader,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::GradeLeader => "grade_leader",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "grade_leader" => Ok(Role::GradeLeader),
            other => Err(format!(
                "role must be one of: admin, teacher, grade_leader (got {})",
                other
            )),
        }
    }
}

/// Who is asking. Derived per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub class_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamType {
    Midterm,
    Final,
    Quiz,
    Other,
}

impl ExamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExamType::Midterm => "midterm",
            ExamType::Final => "final",
            ExamType::Quiz => "quiz",
            ExamType::Other => "other",
        }
    }
}

impl FromStr for ExamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "midterm" => Ok(ExamType::Midterm),
            "final" => Ok(ExamType::Final),
            "quiz" => Ok(ExamType::Quiz),
            "other" => Ok(ExamType::Other),
            other => Err(format!(
                "examType must be one of: midterm, final, quiz, other (got {})",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    NotStarted,
    InProgress,
    Completed,
    Analyzed,
}

impl ExamStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExamStatus::NotStarted => "not_started",
            ExamStatus::InProgress => "in_progress",
            ExamStatus::Completed => "completed",
            ExamStatus::Analyzed => "analyzed",
        }
    }
}

impl FromStr for ExamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(ExamStatus::NotStarted),
            "in_progress" => Ok(ExamStatus::InProgress),
            "completed" => Ok(ExamStatus::Completed),
            "analyzed" => Ok(ExamStatus::Analyzed),
            other => Err(format!(
                "status must be one of: not_started, in_progress, completed, analyzed (got {})",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: String,
    pub role: Role,
    pub subject: Option<String>,
    pub class_names: Vec<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: String,
    pub name: String,
    pub grade: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub student_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub student_number: String,
    pub class_id: Option<String>,
    pub class_name: Option<String>,
    pub teacher_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Semester {
    pub id: String,
    pub name: String,
    pub school_year: String,
    pub start_date: String,
    pub end_date: String,
    pub is_current: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub class_name: String,
    pub exam_date: String,
    pub total_score: f64,
    pub exam_type: ExamType,
    pub status: ExamStatus,
    pub teacher_id: Option<String>,
    pub semester_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub id: String,
    pub student_id: String,
    pub exam_id: String,
    pub user_id: Option<String>,
    #[serde(rename = "score")]
    pub value: Option<f64>,
    pub is_absent: bool,
    pub rank: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl Score {
    /// Present and carrying a value.
    pub fn submitted_value(&self) -> Option<f64> {
        if self.is_absent {
            None
        } else {
            self.value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_wire_names() {
        for role in [Role::Admin, Role::Teacher, Role::GradeLeader] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
            let wire = serde_json::to_value(role).expect("serialize role");
            assert_eq!(wire, serde_json::json!(role.as_str()));
        }
        assert!("principal".parse::<Role>().is_err());
    }

    #[test]
    fn caller_identity_reads_camel_case_and_defaults_classes() {
        let caller: CallerIdentity = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "role": "grade_leader"
        }))
        .expect("parse caller");
        assert_eq!(caller.role, Role::GradeLeader);
        assert!(caller.class_names.is_empty());
    }

    #[test]
    fn absent_score_has_no_submitted_value() {
        let score = Score {
            id: "s".into(),
            student_id: "st".into(),
            exam_id: "e".into(),
            user_id: None,
            value: Some(88.0),
            is_absent: true,
            rank: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(score.submitted_value(), None);
    }
}
