//! MongoDB driver-backed store

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, CollectionOptions};
use mongodb::{Client, Collection, Database};
use tracing::info;

use super::{DocumentStore, InsertSummary, ScopedHandle, StoreError};
use crate::concern::{Concerns, ReadConcernLevel, WriteConcernLevel};
use crate::document::Person;

/// Connection to a replica set
#[derive(Clone, Debug)]
pub struct ClusterClient {
    client: Client,
}

impl ClusterClient {
    /// Open a client for `uri`.
    ///
    /// With `direct_connection` the driver talks to the seed host only and
    /// skips replica set discovery.
    pub async fn connect(uri: &str, direct_connection: bool) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(uri).await?;
        options.direct_connection = Some(direct_connection);
        options.app_name = Some("replset-harness".to_string());
        let client = Client::with_options(options)?;
        info!(%uri, direct_connection, "connected to cluster");
        Ok(ClusterClient { client })
    }

    /// The `admin` database, for replica set commands
    pub fn admin(&self) -> Database {
        self.client.database("admin")
    }

    /// Store over `database.collection`
    pub fn store(&self, database: &str, collection: &str) -> MongoStore {
        MongoStore::new(self.client.database(database), collection)
    }

    /// Unscoped handle on `database.collection`
    pub fn handle(&self, database: &str, collection: &str) -> ScopedHandle {
        ScopedHandle::new(Arc::new(self.store(database, collection)))
    }
}

/// A collection whose concerns are chosen per operation
#[derive(Clone, Debug)]
pub struct MongoStore {
    database: Database,
    collection: String,
}

impl MongoStore {
    /// Create a store over `collection` in `database`
    pub fn new(database: Database, collection: &str) -> Self {
        MongoStore {
            database,
            collection: collection.to_string(),
        }
    }

    /// Collection handle carrying `concerns`; a fresh handle per call, so
    /// overrides never stick to a shared collection object
    fn collection(&self, concerns: &Concerns) -> Collection<Person> {
        let mut options = CollectionOptions::default();
        options.write_concern = concerns.write.map(WriteConcernLevel::to_driver);
        options.read_concern = concerns.read.map(ReadConcernLevel::to_driver);
        self.database
            .collection_with_options(&self.collection, options)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn insert_many(
        &self,
        docs: &[Person],
        concerns: &Concerns,
    ) -> Result<InsertSummary, StoreError> {
        let result = self.collection(concerns).insert_many(docs).await?;
        Ok(InsertSummary {
            inserted: result.inserted_ids.len(),
        })
    }

    async fn find(&self, concerns: &Concerns) -> Result<Vec<Person>, StoreError> {
        let cursor = self.collection(concerns).find(doc! {}).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let result = self
            .collection(&Concerns::default())
            .delete_many(doc! {})
            .await?;
        Ok(result.deleted_count)
    }
}
