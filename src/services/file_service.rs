//! FileService: buckets of named binary files.
//!
//! Files are addressed by name, and names are not unique in the store: "the
//! file called X" is the first match in natural order. A second file with the
//! same name (only possible through other writers) is unreachable here.
//!
//! Replacing a file is delete-then-create, not an in-place update. The two
//! steps are not atomic: if the create fails after the delete succeeded, the
//! old file stays deleted and the caller gets `DatasourceFault`. Bucket
//! removal drops the two sibling collections one after the other with the
//! same policy.

use super::{GatewayError, GatewayResult, datasource_fault, discovery::Discovery, require};
use crate::{
    media,
    models::file::{FileEnvelope, FileInfo},
    store::{Store, StoreError, gridfs::GridFs},
};
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use std::io;
use tracing::{info, warn};

#[derive(Clone)]
pub struct FileService {
    store: Store,
    discovery: Discovery,
}

/// A one-piece stream over bytes already in memory.
pub fn bytes_stream(bytes: Bytes) -> impl Stream<Item = io::Result<Bytes>> + Send {
    stream::iter(std::iter::once(Ok(bytes)))
}

impl FileService {
    pub fn new(store: Store) -> Self {
        Self {
            discovery: Discovery::new(store.clone()),
            store,
        }
    }

    fn bucket(&self, database: &str, bucket: &str) -> GridFs {
        GridFs::new(self.store.clone(), database, bucket)
    }

    pub async fn list_buckets(&self, database: &str) -> GatewayResult<Vec<String>> {
        self.ensure_database(database).await?;
        let raw = self
            .discovery
            .list_collection_names(database)
            .await
            .map_err(datasource_fault("An error occurred while retrieving the bucket list"))?;
        Ok(super::discovery::discover_buckets(&raw).into_iter().collect())
    }

    /// Create an empty bucket (both sibling collections).
    pub async fn create_bucket(&self, database: &str, bucket: &str) -> GatewayResult<()> {
        require(bucket, "bucket name")?;
        self.ensure_database(database).await?;
        if self.bucket_exists(database, bucket).await? {
            return Err(GatewayError::AlreadyExists(
                "The bucket already exists in the database".into(),
            ));
        }

        self.bucket(database, bucket)
            .ensure_bucket()
            .await
            .map_err(datasource_fault("An error occurred while adding the bucket"))?;
        info!(database, bucket, "bucket created");
        Ok(())
    }

    /// Drop `<bucket>.chunks`, then `<bucket>.files`.
    pub async fn remove_bucket(&self, database: &str, bucket: &str) -> GatewayResult<()> {
        self.ensure_database(database).await?;
        self.ensure_bucket(database, bucket).await?;

        let fs = self.bucket(database, bucket);
        self.store
            .drop_collection(database, &fs.chunks_collection())
            .await
            .map_err(datasource_fault("An error occurred while deleting the bucket"))?;
        if let Err(err) = self.store.drop_collection(database, &fs.files_collection()).await {
            warn!(
                database,
                bucket,
                "bucket chunks dropped but its files collection remains"
            );
            return Err(datasource_fault("An error occurred while deleting the bucket")(err));
        }

        info!(database, bucket, "bucket removed");
        Ok(())
    }

    pub async fn list_files(&self, database: &str, bucket: &str) -> GatewayResult<Vec<FileInfo>> {
        self.ensure_database(database).await?;
        self.ensure_bucket(database, bucket).await?;
        self.bucket(database, bucket)
            .list_files()
            .await
            .map_err(datasource_fault("An error occurred while retrieving the file list"))
    }

    /// Remove every file one by one, keeping the bucket itself. A bucket that
    /// does not exist simply has nothing to remove.
    pub async fn remove_all_files(&self, database: &str, bucket: &str) -> GatewayResult<usize> {
        self.ensure_database(database).await?;
        let fs = self.bucket(database, bucket);
        let files = fs
            .list_files()
            .await
            .map_err(datasource_fault("An error occurred while removing files"))?;

        for file in &files {
            fs.remove(file)
                .await
                .map_err(datasource_fault("An error occurred while removing files"))?;
        }
        Ok(files.len())
    }

    /// Form-style upload. Creates the file if the name is free; otherwise
    /// replaces it when `overwrite` is set and fails `AlreadyExists` when not.
    pub async fn upload<S>(
        &self,
        database: &str,
        bucket: &str,
        file_name: &str,
        overwrite: bool,
        content: S,
    ) -> GatewayResult<String>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.validate_upload(database, bucket, file_name).await?;
        let fs = self.bucket(database, bucket);

        match self.find(&fs, file_name).await? {
            None => self.create(&fs, file_name, content).await,
            Some(existing) if overwrite => self.replace(&fs, &existing, content).await,
            Some(_) => Err(GatewayError::AlreadyExists(
                "The file already exists in the bucket".into(),
            )),
        }
    }

    /// Create a file only if no file with that name is in the bucket. The
    /// bucket itself need not exist yet.
    pub async fn upload_if_absent<S>(
        &self,
        database: &str,
        bucket: &str,
        file_name: &str,
        content: S,
    ) -> GatewayResult<String>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.validate_upload(database, bucket, file_name).await?;
        let fs = self.bucket(database, bucket);

        if self.find(&fs, file_name).await?.is_some() {
            return Err(GatewayError::AlreadyExists("The file already exists".into()));
        }
        self.create(&fs, file_name, content).await
    }

    /// Create or replace, regardless of what is there.
    pub async fn upsert_by_name<S>(
        &self,
        database: &str,
        bucket: &str,
        file_name: &str,
        content: S,
    ) -> GatewayResult<String>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.validate_upload(database, bucket, file_name).await?;
        let fs = self.bucket(database, bucket);

        match self.find(&fs, file_name).await? {
            None => self.create(&fs, file_name, content).await,
            Some(existing) => self.replace(&fs, &existing, content).await,
        }
    }

    /// Read a whole file into memory.
    pub async fn download(
        &self,
        database: &str,
        bucket: &str,
        file_name: &str,
    ) -> GatewayResult<FileEnvelope> {
        self.ensure_database(database).await?;
        let fs = self.bucket(database, bucket);
        let info = self.find(&fs, file_name).await?.ok_or_else(file_not_found)?;

        let bytes = fs
            .read_all(&info)
            .await
            .map_err(datasource_fault("An error occurred while retrieving the file"))?;
        Ok(FileEnvelope {
            bytes,
            content_type: info.content_type,
            name: file_name.to_string(),
        })
    }

    pub async fn remove_by_name(
        &self,
        database: &str,
        bucket: &str,
        file_name: &str,
    ) -> GatewayResult<()> {
        self.ensure_database(database).await?;
        let fs = self.bucket(database, bucket);
        let info = self.find(&fs, file_name).await?.ok_or_else(file_not_found)?;

        fs.remove(&info)
            .await
            .map_err(datasource_fault("An error occurred while removing the file"))?;
        info!(database, bucket, file = file_name, "file removed");
        Ok(())
    }

    async fn validate_upload(&self, database: &str, bucket: &str, file_name: &str) -> GatewayResult<()> {
        require(database, "database name")?;
        require(bucket, "bucket name")?;
        require(file_name, "file name")?;
        self.ensure_database(database).await
    }

    async fn find(&self, fs: &GridFs, file_name: &str) -> GatewayResult<Option<FileInfo>> {
        fs.find_one(file_name)
            .await
            .map_err(datasource_fault("An error occurred while looking up the file"))
    }

    async fn create<S>(&self, fs: &GridFs, file_name: &str, content: S) -> GatewayResult<String>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        // The first piece feeds content sniffing, then goes back in front.
        let mut content = Box::pin(content);
        let head = content
            .next()
            .await
            .transpose()
            .map_err(|err| datasource_fault("Could not persist file to bucket")(StoreError::Io(err)))?;
        let content_type = media::detect(file_name, head.as_deref().unwrap_or_default());
        let content = stream::iter(head.map(Ok)).chain(content);

        let info = fs
            .create_file(file_name, &content_type, content)
            .await
            .map_err(datasource_fault("Could not persist file to bucket"))?;
        Ok(info.id)
    }

    async fn replace<S>(&self, fs: &GridFs, existing: &FileInfo, content: S) -> GatewayResult<String>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        fs.remove(existing)
            .await
            .map_err(datasource_fault("An error occurred while replacing the file"))?;
        self.create(fs, &existing.filename, content).await.inspect_err(|_| {
            warn!(
                file = %existing.filename,
                id = %existing.id,
                "old file removed but its replacement was not stored"
            );
        })
    }

    async fn ensure_database(&self, database: &str) -> GatewayResult<()> {
        let exists = self
            .discovery
            .database_exists(database)
            .await
            .map_err(datasource_fault("An error occurred while looking up the database"))?;
        if exists {
            Ok(())
        } else {
            Err(GatewayError::NotFound(
                "The database doesn't exist in the datasource".into(),
            ))
        }
    }

    async fn bucket_exists(&self, database: &str, bucket: &str) -> GatewayResult<bool> {
        self.discovery
            .bucket_exists(database, bucket)
            .await
            .map_err(datasource_fault("An error occurred while looking up the bucket"))
    }

    async fn ensure_bucket(&self, database: &str, bucket: &str) -> GatewayResult<()> {
        if self.bucket_exists(database, bucket).await? {
            Ok(())
        } else {
            Err(GatewayError::NotFound(
                "The bucket doesn't exist in the database".into(),
            ))
        }
    }
}

fn file_not_found() -> GatewayError {
    GatewayError::NotFound("The file doesn't exist".into())
}
