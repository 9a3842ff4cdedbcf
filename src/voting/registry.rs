//! One registry per voter category.
//!
//! Identities are not unique across categories (a student number could in
//! principle look like an e-mail local part, and the same person may be both
//! teacher and staff), so the authenticator walks the registries in
//! [`VoterCategory::PRECEDENCE`] order and takes the first match.

use crate::{
    model::{
        common::voter::VoterCategory,
        db::voter::{Voter, VoterProfile},
    },
    store::DynStore,
};

use super::VoteError;

/// Lookup side of a voter registry. Setting the voted flag is not here: it
/// happens inside the ballot transaction, through [`crate::store::LedgerTxn::set_voted`].
#[rocket::async_trait]
pub trait VoterRegistry: Send + Sync {
    fn category(&self) -> VoterCategory;

    /// Canonical form of a natural key, or `None` if the input cannot be a
    /// key in this category at all.
    fn normalize_key(&self, raw: &str) -> Option<String>;

    /// Is this voter currently allowed to take part?
    fn status_allows_voting(&self, voter: &Voter) -> bool;

    /// Advisory only: the ledger re-reads the flag under lock.
    fn has_voted(&self, voter: &Voter) -> bool {
        voter.has_voted
    }

    fn store(&self) -> &DynStore;

    async fn find_by_key(&self, raw: &str) -> Result<Option<Voter>, VoteError> {
        let Some(key) = self.normalize_key(raw) else {
            return Ok(None);
        };
        Ok(self.store().voter_by_key(self.category(), &key).await?)
    }
}

fn normalize_student_number(raw: &str) -> Option<String> {
    let key = raw.trim();
    (!key.is_empty()).then(|| key.to_ascii_uppercase())
}

fn normalize_email(raw: &str) -> Option<String> {
    let key = raw.trim();
    key.contains('@').then(|| key.to_ascii_lowercase())
}

fn staff_is_active(voter: &Voter) -> bool {
    match voter.profile {
        VoterProfile::Teacher { active, .. } | VoterProfile::AdminStaff { active, .. } => active,
        VoterProfile::Student { .. } => false,
    }
}

pub struct StudentRegistry(DynStore);

#[rocket::async_trait]
impl VoterRegistry for StudentRegistry {
    fn category(&self) -> VoterCategory {
        VoterCategory::Student
    }

    fn normalize_key(&self, raw: &str) -> Option<String> {
        normalize_student_number(raw)
    }

    fn status_allows_voting(&self, _voter: &Voter) -> bool {
        true
    }

    fn store(&self) -> &DynStore {
        &self.0
    }
}

pub struct TeacherRegistry(DynStore);

#[rocket::async_trait]
impl VoterRegistry for TeacherRegistry {
    fn category(&self) -> VoterCategory {
        VoterCategory::Teacher
    }

    fn normalize_key(&self, raw: &str) -> Option<String> {
        normalize_email(raw)
    }

    fn status_allows_voting(&self, voter: &Voter) -> bool {
        staff_is_active(voter)
    }

    fn store(&self) -> &DynStore {
        &self.0
    }
}

pub struct AdminStaffRegistry(DynStore);

#[rocket::async_trait]
impl VoterRegistry for AdminStaffRegistry {
    fn category(&self) -> VoterCategory {
        VoterCategory::AdminStaff
    }

    fn normalize_key(&self, raw: &str) -> Option<String> {
        normalize_email(raw)
    }

    fn status_allows_voting(&self, voter: &Voter) -> bool {
        staff_is_active(voter)
    }

    fn store(&self) -> &DynStore {
        &self.0
    }
}

/// All registries, in lookup precedence order.
pub fn registries(store: &DynStore) -> Vec<Box<dyn VoterRegistry>> {
    VoterCategory::PRECEDENCE
        .into_iter()
        .map(|category| registry_for(category, store))
        .collect()
}

pub fn registry_for(category: VoterCategory, store: &DynStore) -> Box<dyn VoterRegistry> {
    match category {
        VoterCategory::Student => Box::new(StudentRegistry(store.clone())),
        VoterCategory::Teacher => Box::new(TeacherRegistry(store.clone())),
        VoterCategory::AdminStaff => Box::new(AdminStaffRegistry(store.clone())),
    }
}

/// Build the stored profile for a new voter, normalising its key.
pub fn profile_for(
    category: VoterCategory,
    raw_key: &str,
    active: bool,
) -> Option<VoterProfile> {
    Some(match category {
        VoterCategory::Student => VoterProfile::Student {
            student_number: normalize_student_number(raw_key)?,
        },
        VoterCategory::Teacher => VoterProfile::Teacher {
            email: normalize_email(raw_key)?,
            active,
        },
        VoterCategory::AdminStaff => VoterProfile::AdminStaff {
            email: normalize_email(raw_key)?,
            active,
        },
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        model::{
            common::candidate::Slate,
            db::voter::VoterCore,
        },
        store::MemoryStore,
    };

    use super::*;

    #[test]
    fn key_normalisation() {
        assert_eq!(normalize_student_number("  s-100 "), Some("S-100".to_string()));
        assert_eq!(normalize_student_number("   "), None);
        assert_eq!(
            normalize_email(" Ms.Hart@School.Example"),
            Some("ms.hart@school.example".to_string())
        );
        assert_eq!(normalize_email("S-100"), None);
    }

    #[test]
    fn precedence_order() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let categories: Vec<_> = registries(&store).iter().map(|r| r.category()).collect();
        assert_eq!(
            categories,
            vec![
                VoterCategory::Student,
                VoterCategory::Teacher,
                VoterCategory::AdminStaff
            ]
        );
    }

    #[rocket::async_test]
    async fn lookup_and_status() {
        let store: DynStore = Arc::new(MemoryStore::new());
        store
            .insert_voter(&VoterCore::student_example("S-100", "9B", Slate::Senior))
            .await
            .unwrap();
        store
            .insert_voter(&VoterCore::teacher_example("gone@school.example", false))
            .await
            .unwrap();

        let students = registry_for(VoterCategory::Student, &store);
        let student = students.find_by_key("s-100").await.unwrap().unwrap();
        assert!(students.status_allows_voting(&student));

        let teachers = registry_for(VoterCategory::Teacher, &store);
        assert!(teachers.find_by_key("S-100").await.unwrap().is_none());
        let teacher = teachers
            .find_by_key("GONE@school.example")
            .await
            .unwrap()
            .unwrap();
        assert!(!teachers.status_allows_voting(&teacher));

        let staff = registry_for(VoterCategory::AdminStaff, &store);
        assert!(staff.find_by_key("gone@school.example").await.unwrap().is_none());
    }

    #[test]
    fn profiles_are_normalised() {
        assert_eq!(
            profile_for(VoterCategory::Teacher, "A@B.C", true),
            Some(VoterProfile::Teacher {
                email: "a@b.c".to_string(),
                active: true
            })
        );
        assert_eq!(profile_for(VoterCategory::AdminStaff, "no-at-sign", true), None);
    }
}
