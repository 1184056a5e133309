//! Data access for the `drug` table.
//!
//! Operations named `*_owner_user_id*` only ever see the rows of that user.
//! `find_all`, `find_all_matching`, `find_by_id` and
//! `find_distinct_owner_ids_with_expiring_drugs` cross tenants and are meant
//! for trusted background jobs and admin tooling.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::models::{Drug, DrugWithForm, FormCount, NewDrug};
use super::pagination::{Page, Pageable};
use super::specification::Specification;
use super::DatabaseError;

const DRUG_COLUMNS: &str = "d.drug_id, d.owner_user_id, d.drug_name, d.drug_description, \
     d.expiration_date, d.drug_form_id, d.alert_sent, d.alert_sent_at";

const DRUG_WITH_FORM_COLUMNS: &str = "d.drug_id, d.owner_user_id, d.drug_name, \
     d.drug_description, d.expiration_date, d.drug_form_id, d.alert_sent, d.alert_sent_at, \
     f.name";

const FROM_DRUG_JOIN_FORM: &str = " FROM drug d JOIN drug_form f ON f.drug_form_id = d.drug_form_id";

/// Typed access to the `drug` table over a shared PostgreSQL pool.
///
/// Cloning is cheap: clones share the same pool.
#[derive(Clone)]
pub struct DrugRepository {
    pool: PgPool,
}

impl DrugRepository {
    /// Creates a repository over an existing connection pool.
    ///
    /// Parameters:
    /// - `pool`: A PostgreSQL connection pool, usually the one returned by
    ///   `db::init_db` so the schema is already migrated.
    ///
    /// Returns:
    /// - A `DrugRepository` that issues every query through `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Looks up one drug of one user.
    ///
    /// Parameters:
    /// - `drug_id`: The drug to fetch.
    /// - `user_id`: The user the drug must belong to.
    ///
    /// Returns:
    /// - `Ok(Some(drug))` if the drug exists and is owned by `user_id`.
    /// - `Ok(None)` both when the drug does not exist and when it belongs
    ///   to another user, so callers cannot tell the two apart.
    pub async fn find_by_drug_id_and_owner_user_id(
        &self,
        drug_id: i32,
        user_id: i32,
    ) -> Result<Option<Drug>, DatabaseError> {
        let drug = sqlx::query_as::<_, Drug>(&format!(
            "SELECT {} FROM drug d WHERE d.drug_id = $1 AND d.owner_user_id = $2",
            DRUG_COLUMNS
        ))
        .bind(drug_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(drug)
    }

    /// Counts all drugs owned by `user_id`.
    ///
    /// Returns:
    /// - `Ok(count)`, zero for a user with no drugs.
    /// - `Err(DatabaseError)` if the query fails.
    pub async fn count_by_owner_user_id(&self, user_id: i32) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM drug WHERE owner_user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Counts drugs expiring strictly before `date`.
    pub async fn count_by_owner_user_id_and_expiration_date_before(
        &self,
        user_id: i32,
        date: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM drug WHERE owner_user_id = $1 AND expiration_date < $2",
        )
        .bind(user_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Counts drugs of `user_id` whose alert was sent in the half-open
    /// window `[from, to)`.
    ///
    /// Parameters:
    /// - `user_id`: The owning user.
    /// - `from`: Inclusive lower bound on `alert_sent_at`.
    /// - `to`: Exclusive upper bound on `alert_sent_at`.
    ///
    /// Returns:
    /// - `Ok(count)`. Drugs never alerted are not counted.
    pub async fn count_by_owner_user_id_and_alert_sent_at_greater_than_equal_and_alert_sent_at_less_than(
        &self,
        user_id: i32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM drug
             WHERE owner_user_id = $1 AND alert_sent_at >= $2 AND alert_sent_at < $3",
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Drug counts per form name, ordered by name.
    pub async fn count_grouped_by_form_and_user_id(
        &self,
        user_id: i32,
    ) -> Result<Vec<FormCount>, DatabaseError> {
        let counts = sqlx::query_as::<_, FormCount>(&format!(
            "SELECT f.name AS form_name, COUNT(d.drug_id) AS drug_count{}
             WHERE d.owner_user_id = $1
             GROUP BY f.name
             ORDER BY f.name",
            FROM_DRUG_JOIN_FORM
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    /// Unalerted drugs of one user expiring on or before `date`, with their
    /// form loaded.
    pub async fn find_by_owner_user_id_and_expiration_date_less_than_equal_and_alert_sent_false(
        &self,
        user_id: i32,
        date: DateTime<Utc>,
    ) -> Result<Vec<DrugWithForm>, DatabaseError> {
        let drugs = sqlx::query_as::<_, DrugWithForm>(&format!(
            "SELECT {}{}
             WHERE d.owner_user_id = $1 AND d.expiration_date <= $2 AND d.alert_sent = FALSE
             ORDER BY d.expiration_date, d.drug_id",
            DRUG_WITH_FORM_COLUMNS, FROM_DRUG_JOIN_FORM
        ))
        .bind(user_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(drugs)
    }

    /// Flags every listed drug as alerted at `now`.
    ///
    /// The update is a single statement inside a transaction. Ids are not
    /// tenant scoped.
    ///
    /// Parameters:
    /// - `ids`: The drugs to flag. Unknown ids are ignored.
    /// - `now`: Stored as `alert_sent_at`.
    ///
    /// Returns:
    /// - `Ok(rows)` with the number of rows updated; `Ok(0)` for an empty
    ///   list, without touching the database.
    pub async fn mark_alerts_as_sent(
        &self,
        ids: &[i32],
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE drug SET alert_sent = TRUE, alert_sent_at = $2 WHERE drug_id = ANY($1)",
        )
        .bind(ids)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        log::debug!(
            "Marked {} of {} drugs as alerted",
            result.rows_affected(),
            ids.len()
        );
        Ok(result.rows_affected())
    }

    /// Fetches one page of drugs across all users.
    ///
    /// Parameters:
    /// - `pageable`: Page number, size and sort keys. `drug_id` is always
    ///   the last sort key.
    ///
    /// Returns:
    /// - `Ok(page)` with the requested slice and the total row count.
    /// - `Err(DatabaseError)` if either query fails.
    pub async fn find_all(&self, pageable: &Pageable) -> Result<Page<Drug>, DatabaseError> {
        let total = self.count_matching(&Specification::All).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {}{} WHERE TRUE",
            DRUG_COLUMNS, FROM_DRUG_JOIN_FORM
        ));
        pageable.push_sql(&mut qb);

        let content = qb.build_query_as::<Drug>().fetch_all(&self.pool).await?;

        Ok(Page::new(content, pageable, total))
    }

    /// Page of drugs matching `spec`, across all users, with forms loaded.
    ///
    /// Returns `DatabaseError::InvalidQuery` without querying when `spec`
    /// fails validation.
    pub async fn find_all_matching(
        &self,
        spec: &Specification,
        pageable: &Pageable,
    ) -> Result<Page<DrugWithForm>, DatabaseError> {
        spec.validate()?;

        let total = self.count_matching(spec).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {}{} WHERE ",
            DRUG_WITH_FORM_COLUMNS, FROM_DRUG_JOIN_FORM
        ));
        spec.push_sql(&mut qb);
        pageable.push_sql(&mut qb);

        log::debug!("Fetching drug page: {}", qb.sql());
        let content = qb
            .build_query_as::<DrugWithForm>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(content, pageable, total))
    }

    async fn count_matching(&self, spec: &Specification) -> Result<u64, DatabaseError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT COUNT(*){} WHERE ",
            FROM_DRUG_JOIN_FORM
        ));
        spec.push_sql(&mut qb);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    /// Each user owning at least one unalerted drug expiring on or before
    /// `date`, once, in ascending order.
    pub async fn find_distinct_owner_ids_with_expiring_drugs(
        &self,
        date: DateTime<Utc>,
    ) -> Result<Vec<i32>, DatabaseError> {
        let owners = sqlx::query_scalar::<_, i32>(
            "SELECT DISTINCT owner_user_id FROM drug
             WHERE expiration_date <= $1 AND alert_sent = FALSE
             ORDER BY owner_user_id",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(owners)
    }

    /// Removes every drug of `user_id`. Returns the number of rows deleted.
    pub async fn delete_all_by_owner_user_id(&self, user_id: i32) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM drug WHERE owner_user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        log::info!(
            "Deleted {} drugs of user {}",
            result.rows_affected(),
            user_id
        );
        Ok(result.rows_affected())
    }

    /// Inserts a new, unalerted drug.
    ///
    /// Returns the stored row, or `DatabaseError::ConstraintViolation` when
    /// `drug_form_id` names no form.
    pub async fn save(&self, drug: &NewDrug) -> Result<Drug, DatabaseError> {
        let saved = sqlx::query_as::<_, Drug>(
            "INSERT INTO drug (owner_user_id, drug_name, drug_description, expiration_date, drug_form_id)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING drug_id, owner_user_id, drug_name, drug_description,
                       expiration_date, drug_form_id, alert_sent, alert_sent_at",
        )
        .bind(drug.owner_user_id)
        .bind(&drug.drug_name)
        .bind(&drug.drug_description)
        .bind(drug.expiration_date)
        .bind(drug.drug_form_id)
        .fetch_one(&self.pool)
        .await?;

        log::debug!("Saved drug {} for user {}", saved.drug_id, saved.owner_user_id);
        Ok(saved)
    }

    /// Global lookup by id, for trusted jobs only.
    pub async fn find_by_id(&self, drug_id: i32) -> Result<Option<Drug>, DatabaseError> {
        let drug = sqlx::query_as::<_, Drug>(&format!(
            "SELECT {} FROM drug d WHERE d.drug_id = $1",
            DRUG_COLUMNS
        ))
        .bind(drug_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(drug)
    }

    /// Returns `false` when no drug with that id belongs to `user_id`.
    pub async fn delete_by_id_and_owner_user_id(
        &self,
        drug_id: i32,
        user_id: i32,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM drug WHERE drug_id = $1 AND owner_user_id = $2")
            .bind(drug_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
