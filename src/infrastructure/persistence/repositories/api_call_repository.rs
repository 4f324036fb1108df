use std::fmt;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set};

use crate::domain::models::AuditCall;
use crate::infrastructure::persistence::entities::api_calls;
use crate::infrastructure::persistence::error::DbError;

/// Repository for api_calls (audit) records
#[derive(Clone)]
pub struct ApiCallRepository {
    conn: DatabaseConnection,
}

impl fmt::Debug for ApiCallRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCallRepository").finish_non_exhaustive()
    }
}

impl ApiCallRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Persist the audit record; entries produced by the call reference its id
    pub async fn record<C: ConnectionTrait>(
        &self,
        db: &C,
        call: &AuditCall,
    ) -> Result<api_calls::Model, DbError> {
        let model = api_calls::ActiveModel {
            name: Set(call.name.clone()),
            actor: Set(call.actor.clone()),
            details: Set(serde_json::to_string(&call.details)?),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        Ok(model.insert(db).await?)
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        db: &C,
        id: i32,
    ) -> Result<Option<api_calls::Model>, DbError> {
        Ok(api_calls::Entity::find_by_id(id).one(db).await?)
    }
}
