//! Typed access to the `pets` key.

use classpet_shared::constants::keys;

use crate::database::Database;
use crate::error::Result;
use crate::models::Pet;

impl Database {
    pub fn pets(&self) -> Result<Vec<Pet>> {
        Ok(self.get_json(keys::PETS)?.unwrap_or_default())
    }

    pub fn save_pets(&self, pets: &[Pet]) -> Result<()> {
        self.set_json(keys::PETS, pets)
    }

    pub fn pets_for_student(&self, student_id: &str) -> Result<Vec<Pet>> {
        Ok(self
            .pets()?
            .into_iter()
            .filter(|p| p.student_id == student_id)
            .collect())
    }

    pub fn active_pet(&self, student_id: &str) -> Result<Option<Pet>> {
        Ok(self
            .pets()?
            .into_iter()
            .find(|p| p.student_id == student_id && p.is_active()))
    }

    /// Insert or replace by id.  Returns the updated list.
    pub fn upsert_pet(&self, pet: &Pet) -> Result<Vec<Pet>> {
        let mut pets = self.pets()?;
        match pets.iter_mut().find(|p| p.id == pet.id) {
            Some(existing) => *existing = pet.clone(),
            None => pets.push(pet.clone()),
        }
        self.set_json(keys::PETS, &pets)?;
        Ok(pets)
    }

    pub fn remove_pets_for_student(&self, student_id: &str) -> Result<Vec<Pet>> {
        let mut pets = self.pets()?;
        pets.retain(|p| p.student_id != student_id);
        self.set_json(keys::PETS, &pets)?;
        Ok(pets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn active_pet_ignores_completed() {
        let db = Database::open_in_memory().unwrap();
        let mut old = Pet::new("p1".into(), "s1".into(), "cat".into(), "Nabi".into());
        old.finalize(Utc::now());
        db.upsert_pet(&old).unwrap();
        assert!(db.active_pet("s1").unwrap().is_none());

        let new = Pet::new("p2".into(), "s1".into(), "dog".into(), "Bori".into());
        db.upsert_pet(&new).unwrap();
        assert_eq!(db.active_pet("s1").unwrap().unwrap().id, "p2");
        assert_eq!(db.pets_for_student("s1").unwrap().len(), 2);

        db.remove_pets_for_student("s1").unwrap();
        assert!(db.pets().unwrap().is_empty());
    }
}
