//! Sanctioned-post allocation for an office/post pair.

use crate::error::HrError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sanctioned staffing for one office/post pair. The counts are private so
/// `filled <= total` holds for every reachable value, and `vacant_posts` is
/// always derived; it is never stored independently of the other two counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatedPosts {
    pub office_id: Uuid,
    pub post_id: Uuid,
    total_allocated: u32,
    filled_posts: u32,
}

impl AllocatedPosts {
    pub fn new(
        office_id: Uuid,
        post_id: Uuid,
        total_allocated: u32,
        filled_posts: u32,
    ) -> Result<Self, HrError> {
        if filled_posts > total_allocated {
            return Err(HrError::Validation(format!(
                "filled posts ({filled_posts}) cannot exceed allocation ({total_allocated})"
            )));
        }
        Ok(Self {
            office_id,
            post_id,
            total_allocated,
            filled_posts,
        })
    }

    pub fn total_allocated(&self) -> u32 {
        self.total_allocated
    }

    pub fn filled_posts(&self) -> u32 {
        self.filled_posts
    }

    pub fn vacant_posts(&self) -> u32 {
        self.total_allocated - self.filled_posts
    }

    pub fn set_filled(&mut self, filled_posts: u32) -> Result<(), HrError> {
        if filled_posts > self.total_allocated {
            return Err(HrError::Validation(format!(
                "filled posts ({filled_posts}) cannot exceed allocation ({})",
                self.total_allocated
            )));
        }
        self.filled_posts = filled_posts;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vacancy_is_derived() {
        let allocation = AllocatedPosts::new(Uuid::new_v4(), Uuid::new_v4(), 10, 7).unwrap();
        assert_eq!(allocation.vacant_posts(), 3);
    }

    #[test]
    fn overfilled_allocation_is_rejected() {
        assert!(AllocatedPosts::new(Uuid::new_v4(), Uuid::new_v4(), 5, 6).is_err());

        let mut allocation = AllocatedPosts::new(Uuid::new_v4(), Uuid::new_v4(), 5, 5).unwrap();
        assert_eq!(allocation.vacant_posts(), 0);
        assert!(allocation.set_filled(6).is_err());
        assert_eq!(allocation.filled_posts(), 5);
    }

    #[test]
    fn counts_only_move_through_the_validated_setter() {
        let mut allocation = AllocatedPosts::new(Uuid::new_v4(), Uuid::new_v4(), 8, 2).unwrap();
        allocation.set_filled(8).unwrap();
        assert_eq!(allocation.filled_posts(), 8);
        assert_eq!(allocation.total_allocated(), 8);
        assert_eq!(allocation.vacant_posts(), 0);
    }
}
