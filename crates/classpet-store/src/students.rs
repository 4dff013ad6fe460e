//! Typed access to the `students` key.

use classpet_shared::constants::keys;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Student;

impl Database {
    /// All students, ordered by number.
    pub fn students(&self) -> Result<Vec<Student>> {
        Ok(self.get_json(keys::STUDENTS)?.unwrap_or_default())
    }

    pub fn save_students(&self, students: &[Student]) -> Result<()> {
        let mut sorted = students.to_vec();
        sorted.sort_by_key(|s| s.number);
        self.set_json(keys::STUDENTS, &sorted)
    }

    pub fn get_student(&self, id: &str) -> Result<Student> {
        self.students()?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("student {id}")))
    }

    pub fn find_student_by_number(&self, number: u32) -> Result<Option<Student>> {
        Ok(self.students()?.into_iter().find(|s| s.number == number))
    }

    /// Insert or replace by id.  Returns the updated list.
    pub fn upsert_student(&self, student: &Student) -> Result<Vec<Student>> {
        let mut students = self.students()?;
        match students.iter_mut().find(|s| s.id == student.id) {
            Some(existing) => *existing = student.clone(),
            None => students.push(student.clone()),
        }
        students.sort_by_key(|s| s.number);
        self.set_json(keys::STUDENTS, &students)?;
        Ok(students)
    }

    /// Remove by id.  Returns the updated list, or `None` if it was absent.
    pub fn delete_student(&self, id: &str) -> Result<Option<Vec<Student>>> {
        let mut students = self.students()?;
        let before = students.len();
        students.retain(|s| s.id != id);
        if students.len() == before {
            return Ok(None);
        }
        self.set_json(keys::STUDENTS, &students)?;
        Ok(Some(students))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classpet_shared::Pin;

    fn student(id: &str, number: u32) -> Student {
        Student::new(
            id.into(),
            number,
            format!("student {number}"),
            Pin::default_for(number).unwrap(),
        )
    }

    #[test]
    fn empty_by_default() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.students().unwrap().is_empty());
        assert!(matches!(db.get_student("x"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn upsert_keeps_number_order() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_student(&student("b", 2)).unwrap();
        db.upsert_student(&student("a", 1)).unwrap();
        let mut renamed = student("b", 2);
        renamed.name = "Park".into();
        let list = db.upsert_student(&renamed).unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "a");
        assert_eq!(list[1].name, "Park");
        assert_eq!(db.find_student_by_number(2).unwrap().unwrap().name, "Park");
    }

    #[test]
    fn delete_reports_absence() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_student(&student("a", 1)).unwrap();
        assert_eq!(db.delete_student("a").unwrap().unwrap().len(), 0);
        assert!(db.delete_student("a").unwrap().is_none());
    }
}
