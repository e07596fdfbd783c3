use sqlx::PgConnection;
use tracing::{Instrument, instrument};

use crate::{
    dao::common::{expect_single_row, handle_database_error},
    model::{
        apperror::ApplicationError,
        models::{EnterpriseInputType, EnterpriseType, PaginationInput},
    },
};

/**
 * Database response type for enterprise queries.
 */
pub type QueryEnterpriseDbResp = (i64, String, String, String, String);

const QUERY_ENTERPRISE_LIST: &str = "SELECT id, name, requisites, phone, contact_person FROM enterprises ORDER BY id LIMIT $1 OFFSET $2";

const QUERY_ENTERPRISE: &str = "SELECT id, name, requisites, phone, contact_person FROM enterprises WHERE id = $1";

const ADD_ENTERPRISE: &str = "INSERT INTO enterprises (name, requisites, phone, contact_person) VALUES ($1, $2, $3, $4) RETURNING id, name, requisites, phone, contact_person";

const UPDATE_ENTERPRISE: &str = "UPDATE enterprises SET name = $1, requisites = $2, phone = $3, contact_person = $4 WHERE id = $5";

const DELETE_ENTERPRISE: &str = "DELETE FROM enterprises WHERE id = $1";

/**
 * DAO for enterprises.
 */
pub struct EnterpriseDao {}

impl EnterpriseDao {
    pub fn new() -> Self {
        EnterpriseDao {}
    }

    /**
     * Retrieves a page of enterprises ordered by id.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_enterprise_list(&self, connection: &mut PgConnection, pagination_input: PaginationInput) -> Result<Vec<EnterpriseType>, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryEnterpriseDbResp> = sqlx::query_as(QUERY_ENTERPRISE_LIST)
            .bind(pagination_input.limit)
            .bind(pagination_input.skip)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(results.into_iter().map(EnterpriseType::from).collect())
    }

    /**
     * Retrieves a single enterprise.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_enterprise(&self, connection: &mut PgConnection, enterprise_id: i64) -> Result<Option<EnterpriseType>, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryEnterpriseDbResp> = sqlx::query_as(QUERY_ENTERPRISE)
            .bind(enterprise_id)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(result.map(EnterpriseType::from))
    }

    /**
     * Adds a new enterprise.
     *
     * # Returns
     * The stored enterprise including its generated id.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_enterprise(&self, transaction: &mut PgConnection, enterprise_input: EnterpriseInputType) -> Result<EnterpriseType, ApplicationError> {
        let span = tracing::Span::current();
        let result: QueryEnterpriseDbResp = sqlx::query_as(ADD_ENTERPRISE)
            .bind(enterprise_input.name)
            .bind(enterprise_input.requisites)
            .bind(enterprise_input.phone)
            .bind(enterprise_input.contact_person)
            .fetch_one(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(EnterpriseType::from(result))
    }

    /**
     * Writes all fields of the enterprise.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn update_enterprise(&self, transaction: &mut PgConnection, enterprise: &EnterpriseType) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(UPDATE_ENTERPRISE)
            .bind(&enterprise.name)
            .bind(&enterprise.requisites)
            .bind(&enterprise.phone)
            .bind(&enterprise.contact_person)
            .bind(enterprise.id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "Enterprise", "updated")
    }

    /**
     * Deletes an enterprise by its ID.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn delete_enterprise(&self, transaction: &mut PgConnection, enterprise_id: i64) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(DELETE_ENTERPRISE)
            .bind(enterprise_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "Enterprise", "deleted")
    }
}
