use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    db::store::{
        pair_key, ActiveMatchRow, MatchStore, OverlapRow, PairRoom, RoomCreation, RoomOutcome,
    },
    error::{AppError, AppResult},
    models::{ItemDetails, ItemId, Like, MatchRequest, RoomId, UserId},
};

/// PostgreSQL-backed store of record
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_pair_room(
        &self,
        low: UserId,
        high: UserId,
    ) -> AppResult<Option<(RoomId, DateTime<Utc>)>> {
        let room = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            "SELECT id, created_at FROM rooms WHERE user_low = $1 AND user_high = $2",
        )
        .bind(low)
        .bind(high)
        .fetch_optional(&self.pool)
        .await?;

        Ok(room)
    }
}

#[async_trait]
impl MatchStore for PgStore {
    async fn find_like(&self, user_id: UserId, item_id: ItemId) -> AppResult<Option<Like>> {
        let like = sqlx::query_as::<_, Like>(
            "SELECT user_id, item_id, liked_at FROM likes WHERE user_id = $1 AND item_id = $2",
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(like)
    }

    async fn insert_like(&self, user_id: UserId, item_id: ItemId) -> AppResult<Like> {
        let like = sqlx::query_as::<_, Like>(
            r#"
            INSERT INTO likes (user_id, item_id)
            VALUES ($1, $2)
            RETURNING user_id, item_id, liked_at
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(like)
    }

    async fn delete_like(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM likes WHERE user_id = $1 AND item_id = $2")
            .bind(user_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_likes(&self, user_id: UserId) -> AppResult<Vec<Like>> {
        let likes = sqlx::query_as::<_, Like>(
            r#"
            SELECT user_id, item_id, liked_at
            FROM likes
            WHERE user_id = $1
            ORDER BY liked_at DESC, item_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(likes)
    }

    async fn upsert_item(&self, item: &ItemDetails) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO items (id, title, image_ref, year)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title,
                image_ref = COALESCE(EXCLUDED.image_ref, items.image_ref),
                year = COALESCE(EXCLUDED.year, items.year),
                updated_at = now()
            "#,
        )
        .bind(item.id)
        .bind(&item.title)
        .bind(item.image_ref.as_deref())
        .bind(item.year)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn item_details(&self, item_ids: &[ItemId]) -> AppResult<Vec<ItemDetails>> {
        let items = sqlx::query_as::<_, ItemDetails>(
            "SELECT id, title, image_ref, year FROM items WHERE id = ANY($1)",
        )
        .bind(item_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn display_names(&self, user_ids: &[UserId]) -> AppResult<HashMap<UserId, String>> {
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, display_name FROM users WHERE id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn overlapping_users(
        &self,
        user_id: UserId,
        item_ids: &[ItemId],
    ) -> AppResult<Vec<OverlapRow>> {
        let rows = sqlx::query_as::<_, OverlapRow>(
            r#"
            SELECT user_id,
                   COUNT(*)::BIGINT AS overlap_count,
                   ARRAY_AGG(item_id ORDER BY item_id) AS shared_item_ids,
                   MAX(liked_at) AS latest_liked_at
            FROM likes
            WHERE item_id = ANY($2) AND user_id <> $1
            GROUP BY user_id
            ORDER BY user_id
            "#,
        )
        .bind(user_id)
        .bind(item_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn shared_likes(
        &self,
        user_id: UserId,
        others: &[UserId],
    ) -> AppResult<Vec<(UserId, ItemId)>> {
        let rows = sqlx::query_as::<_, (Uuid, i64)>(
            r#"
            SELECT other.user_id, other.item_id
            FROM likes other
            JOIN likes mine ON mine.item_id = other.item_id AND mine.user_id = $1
            WHERE other.user_id = ANY($2)
            ORDER BY other.user_id, other.item_id
            "#,
        )
        .bind(user_id)
        .bind(others)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_request(
        &self,
        requestor_id: UserId,
        target_user_id: UserId,
        item_id: ItemId,
    ) -> AppResult<Option<MatchRequest>> {
        let request = sqlx::query_as::<_, MatchRequest>(
            r#"
            SELECT requestor_id, target_user_id, item_id, created_at
            FROM match_requests
            WHERE requestor_id = $1 AND target_user_id = $2 AND item_id = $3
            "#,
        )
        .bind(requestor_id)
        .bind(target_user_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    async fn insert_request(
        &self,
        requestor_id: UserId,
        target_user_id: UserId,
        item_id: ItemId,
    ) -> AppResult<MatchRequest> {
        let request = sqlx::query_as::<_, MatchRequest>(
            r#"
            INSERT INTO match_requests (requestor_id, target_user_id, item_id)
            VALUES ($1, $2, $3)
            RETURNING requestor_id, target_user_id, item_id, created_at
            "#,
        )
        .bind(requestor_id)
        .bind(target_user_id)
        .bind(item_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(request)
    }

    async fn delete_request(
        &self,
        requestor_id: UserId,
        target_user_id: UserId,
        item_id: ItemId,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM match_requests
            WHERE requestor_id = $1 AND target_user_id = $2 AND item_id = $3
            "#,
        )
        .bind(requestor_id)
        .bind(target_user_id)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn requests_sent(
        &self,
        requestor_id: UserId,
        targets: &[UserId],
    ) -> AppResult<Vec<MatchRequest>> {
        let requests = sqlx::query_as::<_, MatchRequest>(
            r#"
            SELECT requestor_id, target_user_id, item_id, created_at
            FROM match_requests
            WHERE requestor_id = $1 AND target_user_id = ANY($2)
            "#,
        )
        .bind(requestor_id)
        .bind(targets)
        .fetch_all(&self.pool)
        .await?;

        Ok(requests)
    }

    async fn requests_received(
        &self,
        target_user_id: UserId,
        requestors: &[UserId],
    ) -> AppResult<Vec<MatchRequest>> {
        let requests = sqlx::query_as::<_, MatchRequest>(
            r#"
            SELECT requestor_id, target_user_id, item_id, created_at
            FROM match_requests
            WHERE target_user_id = $1 AND requestor_id = ANY($2)
            "#,
        )
        .bind(target_user_id)
        .bind(requestors)
        .fetch_all(&self.pool)
        .await?;

        Ok(requests)
    }

    async fn active_rooms_with(
        &self,
        user_id: UserId,
        others: &[UserId],
    ) -> AppResult<Vec<PairRoom>> {
        let rooms = sqlx::query_as::<_, PairRoom>(
            r#"
            SELECT other.user_id AS other_user_id, r.id AS room_id, r.created_at AS matched_at
            FROM rooms r
            JOIN room_memberships mine
              ON mine.room_id = r.id AND mine.user_id = $1 AND mine.is_active
            JOIN room_memberships other
              ON other.room_id = r.id AND other.user_id = ANY($2) AND other.is_active
            "#,
        )
        .bind(user_id)
        .bind(others)
        .fetch_all(&self.pool)
        .await?;

        Ok(rooms)
    }

    async fn create_room_for_pair(&self, user_a: UserId, user_b: UserId) -> AppResult<RoomCreation> {
        let (low, high) = pair_key(user_a, user_b);
        let mut tx = self.pool.begin().await?;

        // Re-check inside the transaction; the row lock serializes against a
        // concurrent reactivation of the same room.
        let existing = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            "SELECT id, created_at FROM rooms WHERE user_low = $1 AND user_high = $2 FOR UPDATE",
        )
        .bind(low)
        .bind(high)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((room_id, created_at)) = existing {
            let inactive: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM room_memberships WHERE room_id = $1 AND NOT is_active",
            )
            .bind(room_id)
            .fetch_one(&mut *tx)
            .await?;

            if inactive == 0 {
                tx.rollback().await?;
                return Ok(RoomCreation {
                    room_id,
                    matched_at: created_at,
                    outcome: RoomOutcome::Existing,
                });
            }

            sqlx::query(
                r#"
                UPDATE room_memberships
                SET is_active = true, left_at = NULL, joined_at = now()
                WHERE room_id = $1 AND NOT is_active
                "#,
            )
            .bind(room_id)
            .execute(&mut *tx)
            .await?;

            delete_pair_requests(&mut tx, low, high).await?;
            tx.commit().await?;

            return Ok(RoomCreation {
                room_id,
                matched_at: Utc::now(),
                outcome: RoomOutcome::Reactivated,
            });
        }

        let room_id = Uuid::new_v4();
        let inserted = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            INSERT INTO rooms (id, user_low, user_high)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_low, user_high) DO NOTHING
            RETURNING created_at
            "#,
        )
        .bind(room_id)
        .bind(low)
        .bind(high)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(created_at) = inserted else {
            // A concurrent transaction committed the room first
            tx.rollback().await?;
            let (room_id, matched_at) = self.find_pair_room(low, high).await?.ok_or_else(|| {
                AppError::Conflict("room vanished after conflicting insert".to_string())
            })?;

            return Ok(RoomCreation {
                room_id,
                matched_at,
                outcome: RoomOutcome::Existing,
            });
        };

        sqlx::query(
            r#"
            INSERT INTO room_memberships (room_id, user_id, is_active, joined_at)
            VALUES ($1, $2, true, $4), ($1, $3, true, $4)
            "#,
        )
        .bind(room_id)
        .bind(low)
        .bind(high)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        delete_pair_requests(&mut tx, low, high).await?;
        tx.commit().await?;

        Ok(RoomCreation {
            room_id,
            matched_at: created_at,
            outcome: RoomOutcome::Created,
        })
    }

    async fn set_membership_active(
        &self,
        room_id: RoomId,
        user_id: UserId,
        active: bool,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE room_memberships
            SET is_active = $3,
                left_at = CASE
                    WHEN $3 THEN NULL
                    WHEN is_active THEN now()
                    ELSE left_at
                END,
                joined_at = CASE WHEN $3 AND NOT is_active THEN now() ELSE joined_at END
            WHERE room_id = $1 AND user_id = $2
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(active)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn active_matches(&self, user_id: UserId) -> AppResult<Vec<ActiveMatchRow>> {
        let rows = sqlx::query_as::<_, ActiveMatchRow>(
            r#"
            SELECT other.user_id AS other_user_id,
                   u.display_name,
                   r.id AS room_id,
                   r.created_at AS matched_at,
                   last_msg.created_at AS last_activity_at,
                   LEFT(last_msg.body, 80) AS last_message_preview
            FROM rooms r
            JOIN room_memberships mine
              ON mine.room_id = r.id AND mine.user_id = $1 AND mine.is_active
            JOIN room_memberships other
              ON other.room_id = r.id AND other.user_id <> $1 AND other.is_active
            LEFT JOIN users u ON u.id = other.user_id
            LEFT JOIN LATERAL (
                SELECT m.created_at, m.body
                FROM messages m
                WHERE m.room_id = r.id
                ORDER BY m.created_at DESC
                LIMIT 1
            ) last_msg ON true
            ORDER BY COALESCE(last_msg.created_at, r.created_at) DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Retires every request between the pair, in both directions and for any item
async fn delete_pair_requests(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    low: UserId,
    high: UserId,
) -> AppResult<()> {
    sqlx::query(
        r#"
        DELETE FROM match_requests
        WHERE (requestor_id = $1 AND target_user_id = $2)
           OR (requestor_id = $2 AND target_user_id = $1)
        "#,
    )
    .bind(low)
    .bind(high)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
