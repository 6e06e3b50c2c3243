//! Per-page state for a restaurant detail view: the restaurant and its
//! reviews, loaded once through the coordinator and handed to whatever
//! renders them.

use serde::Serialize;

use crate::app_error::CoreResult;
use crate::local_db_model::{Restaurant, Review};
use crate::sync_coordinator::SyncCoordinator;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestaurantSession {
    pub restaurant: Restaurant,
    pub reviews: Vec<Review>,
}

impl RestaurantSession {
    /// Resolves the restaurant (id as number or URL text) and its reviews.
    pub async fn load(coordinator: &SyncCoordinator, id: impl ToString) -> CoreResult<Self> {
        let restaurant = coordinator.restaurant_by_id(id).await?;
        let reviews = coordinator.reviews_by_restaurant(restaurant.id).await?;
        Ok(Self { restaurant, reviews })
    }

    pub async fn reload_reviews(&mut self, coordinator: &SyncCoordinator) -> CoreResult<()> {
        self.reviews = coordinator.reviews_by_restaurant(self.restaurant.id).await?;
        Ok(())
    }

    /// Submits a review for this restaurant and appends the returned record.
    pub async fn submit_review(
        &mut self,
        coordinator: &SyncCoordinator,
        name: &str,
        rating: u8,
        comments: &str,
    ) -> CoreResult<&Review> {
        let draft = Review::new(self.restaurant.id, name.trim(), rating, comments.trim());
        let review = coordinator.submit_review(draft).await?;
        self.reviews.push(review);
        Ok(&self.reviews[self.reviews.len() - 1])
    }
}
