use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One enrolled course and its grade column, as shown by the portal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Course {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "notas")]
    pub grades: Vec<String>,
}

impl Course {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            grades: vec![],
        }
    }

    pub fn with_grades(mut self, grades: Vec<String>) -> Self {
        self.grades = grades;
        self
    }

    /// Id of the grade table that belongs to this course's panel.
    ///
    /// The portal names course items `idCurso<n>` and their tables `tabla<n>`.
    pub fn grade_table_id(&self) -> String {
        self.id.replace("idCurso", "tabla")
    }
}

/// All enrolled courses in portal enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Snapshot(Vec<Course>);

impl Snapshot {
    /// Builds a snapshot, keeping the first course for any repeated id.
    pub fn from_courses(courses: Vec<Course>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(courses.len());

        for course in courses {
            if seen.insert(course.id.clone()) {
                unique.push(course);
            } else {
                tracing::warn!(id = %course.id, "Dropping duplicate course id");
            }
        }

        Self(unique)
    }

    pub fn courses(&self) -> &[Course] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Course> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Course;
    type IntoIter = std::slice::Iter<'a, Course>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Chat destination for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A portal session cookie, stored the way the browser reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default, alias = "httpOnly")]
    pub http_only: Option<bool>,
}

/// Identity used to log into the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub secret: String,
    /// Speciality/server selector picked in the login form's domain dropdown.
    pub realm: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_table_id() {
        let course = Course::new("idCurso4521", "Análisis Matemático I");
        assert_eq!(course.grade_table_id(), "tabla4521");
    }

    #[test]
    fn test_snapshot_drops_duplicate_ids() {
        let snapshot = Snapshot::from_courses(vec![
            Course::new("c1", "Calc"),
            Course::new("c2", "Physics"),
            Course::new("c1", "Calc again"),
        ]);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.courses()[0].name, "Calc");
        assert_eq!(snapshot.courses()[1].id, "c2");
    }

    #[test]
    fn test_course_reads_legacy_grade_key() {
        let json = r#"[{"id":"idCurso1","name":"Calc","notas":["7","9"]}]"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.courses()[0].grades, vec!["7", "9"]);
    }
}
