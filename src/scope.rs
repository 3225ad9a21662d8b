//! Role-based visibility.
//!
//! Every read path resolves the caller into a [`Scope`] once and then applies it,
//! either in memory via [`Scope::permits`] or in SQL via [`Scope::predicate`].

use crate::error::{ServiceError, ServiceResult};
use crate::model::{CallerIdentity, ClassRecord, Exam, Role, Score, Semester, Student, User};
use rusqlite::types::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    User,
    Class,
    Student,
    Semester,
    Exam,
    Score,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// No restriction.
    Full,
    /// Records the caller owns, or whose class label is one of `class_names`.
    Owned {
        caller_id: String,
        class_names: BTreeSet<String>,
    },
}

pub fn resolve_scope(caller: &CallerIdentity, kind: ResourceKind) -> Scope {
    match caller.role {
        Role::Admin | Role::GradeLeader => Scope::Full,
        Role::Teacher => teacher_scope(caller, kind),
    }
}

fn teacher_scope(caller: &CallerIdentity, kind: ResourceKind) -> Scope {
    match kind {
        // Semesters have no owner.
        ResourceKind::Semester => Scope::Full,
        ResourceKind::User => Scope::Owned {
            caller_id: caller.id.clone(),
            class_names: BTreeSet::new(),
        },
        ResourceKind::Class | ResourceKind::Student | ResourceKind::Exam | ResourceKind::Score => {
            Scope::Owned {
                caller_id: caller.id.clone(),
                class_names: caller.class_names.iter().cloned().collect(),
            }
        }
    }
}

/// A record that can be matched against a [`Scope`].
pub trait ScopedRecord {
    fn owner_ids(&self) -> Vec<&str>;
    fn class_label(&self) -> Option<&str>;
}

impl ScopedRecord for Exam {
    fn owner_ids(&self) -> Vec<&str> {
        self.teacher_id.as_deref().into_iter().collect()
    }
    fn class_label(&self) -> Option<&str> {
        Some(self.class_name.as_str())
    }
}

impl ScopedRecord for Student {
    fn owner_ids(&self) -> Vec<&str> {
        self.teacher_id.as_deref().into_iter().collect()
    }
    fn class_label(&self) -> Option<&str> {
        self.class_name.as_deref()
    }
}

impl ScopedRecord for ClassRecord {
    fn owner_ids(&self) -> Vec<&str> {
        self.created_by.as_deref().into_iter().collect()
    }
    fn class_label(&self) -> Option<&str> {
        Some(self.name.as_str())
    }
}

impl ScopedRecord for User {
    fn owner_ids(&self) -> Vec<&str> {
        vec![self.id.as_str()]
    }
    fn class_label(&self) -> Option<&str> {
        None
    }
}

impl ScopedRecord for Semester {
    fn owner_ids(&self) -> Vec<&str> {
        Vec::new()
    }
    fn class_label(&self) -> Option<&str> {
        None
    }
}

/// A score seen through its exam: the score's creator and the exam's teacher
/// both own it, and it belongs to the exam's class.
pub struct ScoreInExam<'a> {
    pub score: &'a Score,
    pub exam: &'a Exam,
}

impl ScopedRecord for ScoreInExam<'_> {
    fn owner_ids(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.score.user_id.as_deref().into_iter().collect();
        out.extend(self.exam.owner_ids());
        out
    }
    fn class_label(&self) -> Option<&str> {
        self.exam.class_label()
    }
}

/// SQL fragment plus bind values; always safe to splice after `WHERE` or `AND`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopePredicate {
    pub clause: String,
    pub params: Vec<Value>,
}

impl Scope {
    pub fn is_full(&self) -> bool {
        matches!(self, Scope::Full)
    }

    /// True when the caller has full scope or is the given owner.
    pub fn owns(&self, owner_id: Option<&str>) -> bool {
        match self {
            Scope::Full => true,
            Scope::Owned { caller_id, .. } => owner_id == Some(caller_id.as_str()),
        }
    }

    pub fn permits<R: ScopedRecord + ?Sized>(&self, record: &R) -> bool {
        match self {
            Scope::Full => true,
            Scope::Owned {
                caller_id,
                class_names,
            } => {
                record.owner_ids().iter().any(|id| *id == caller_id.as_str())
                    || record
                        .class_label()
                        .map(|label| class_names.contains(label))
                        .unwrap_or(false)
            }
        }
    }

    /// By-id lookups report invisible records exactly like missing ones.
    pub fn visible<R: ScopedRecord>(&self, record: Option<R>, what: &str) -> ServiceResult<R> {
        match record {
            Some(r) if self.permits(&r) => Ok(r),
            _ => Err(ServiceError::not_found(format!("{} not found", what))),
        }
    }

    pub fn predicate(&self, owner_columns: &[&str], class_column: Option<&str>) -> ScopePredicate {
        let (caller_id, class_names) = match self {
            Scope::Full => {
                return ScopePredicate {
                    clause: "1 = 1".to_string(),
                    params: Vec::new(),
                }
            }
            Scope::Owned {
                caller_id,
                class_names,
            } => (caller_id, class_names),
        };

        let mut terms: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        for col in owner_columns {
            terms.push(format!("{} = ?", col));
            params.push(Value::Text(caller_id.clone()));
        }
        if let Some(col) = class_column {
            if !class_names.is_empty() {
                let placeholders = std::iter::repeat("?")
                    .take(class_names.len())
                    .collect::<Vec<_>>()
                    .join(",");
                terms.push(format!("{} IN ({})", col, placeholders));
                params.extend(class_names.iter().map(|c| Value::Text(c.clone())));
            }
        }
        if terms.is_empty() {
            return ScopePredicate {
                clause: "1 = 0".to_string(),
                params,
            };
        }
        ScopePredicate {
            clause: format!("({})", terms.join(" OR ")),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExamStatus, ExamType};
    use proptest::prelude::*;

    fn caller(role: Role, classes: &[&str]) -> CallerIdentity {
        CallerIdentity {
            id: "t1".to_string(),
            role,
            class_names: classes.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn exam(teacher: Option<&str>, class_name: &str) -> Exam {
        Exam {
            id: "e1".into(),
            name: "Unit 1".into(),
            subject: "math".into(),
            class_name: class_name.into(),
            exam_date: "2024-03-01".into(),
            total_score: 100.0,
            exam_type: ExamType::Quiz,
            status: ExamStatus::Completed,
            teacher_id: teacher.map(str::to_string),
            semester_id: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn admin_and_grade_leader_see_everything() {
        for role in [Role::Admin, Role::GradeLeader] {
            let scope = resolve_scope(&caller(role, &[]), ResourceKind::Exam);
            assert!(scope.is_full());
            assert!(scope.permits(&exam(Some("someone-else"), "9-9")));
        }
    }

    #[test]
    fn teacher_sees_own_or_class_records() {
        let scope = resolve_scope(&caller(Role::Teacher, &["1-2"]), ResourceKind::Exam);
        assert!(scope.permits(&exam(Some("t1"), "3-3")));
        assert!(scope.permits(&exam(Some("t9"), "1-2")));
        assert!(!scope.permits(&exam(Some("t9"), "3-3")));
        assert!(!scope.permits(&exam(None, "3-3")));
    }

    #[test]
    fn teacher_without_classes_is_limited_to_ownership() {
        let scope = resolve_scope(&caller(Role::Teacher, &[]), ResourceKind::Exam);
        assert!(!scope.permits(&exam(Some("t9"), "1-2")));
        let pred = scope.predicate(&["e.teacher_id"], Some("e.class_name"));
        assert_eq!(pred.clause, "(e.teacher_id = ?)");
        assert_eq!(pred.params, vec![Value::Text("t1".into())]);
    }

    #[test]
    fn semesters_are_readable_by_teachers() {
        let scope = resolve_scope(&caller(Role::Teacher, &[]), ResourceKind::Semester);
        assert!(scope.is_full());
    }

    #[test]
    fn invisible_record_reads_as_not_found() {
        let scope = resolve_scope(&caller(Role::Teacher, &[]), ResourceKind::Exam);
        let hidden = scope.visible(Some(exam(Some("t9"), "1-2")), "exam");
        let missing = scope.visible(None::<Exam>, "exam");
        let (Err(a), Err(b)) = (hidden, missing) else {
            panic!("both lookups should fail");
        };
        assert_eq!(a.code(), b.code());
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn predicate_binds_owner_then_classes() {
        let scope = resolve_scope(&caller(Role::Teacher, &["1-2", "1-1"]), ResourceKind::Score);
        let pred = scope.predicate(&["sc.user_id", "e.teacher_id"], Some("e.class_name"));
        assert_eq!(
            pred.clause,
            "(sc.user_id = ? OR e.teacher_id = ? OR e.class_name IN (?,?))"
        );
        assert_eq!(pred.params.len(), 4);
        assert_eq!(Scope::Full.predicate(&["x"], None).clause, "1 = 1");
    }

    proptest! {
        #[test]
        fn resolution_is_pure(
            role_idx in 0usize..3,
            classes in proptest::collection::vec("[1-3]-[1-3]", 0..4),
            owner in proptest::option::of("t[0-2]"),
            label in "[1-3]-[1-3]",
        ) {
            let role = [Role::Admin, Role::Teacher, Role::GradeLeader][role_idx];
            let c = CallerIdentity { id: "t1".into(), role, class_names: classes };
            let a = resolve_scope(&c, ResourceKind::Exam);
            let b = resolve_scope(&c, ResourceKind::Exam);
            prop_assert_eq!(&a, &b);
            let e = exam(owner.as_deref(), &label);
            prop_assert_eq!(a.permits(&e), b.permits(&e));
            prop_assert_eq!(
                a.predicate(&["e.teacher_id"], Some("e.class_name")),
                b.predicate(&["e.teacher_id"], Some("e.class_name"))
            );
        }
    }
}
