pub mod classes;
pub mod core;
pub mod exams;
pub mod scores;
pub mod semesters;
pub mod statistics;
pub mod students;
pub mod users;
