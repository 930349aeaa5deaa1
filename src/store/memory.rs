//! In-process store, the default when no MongoDB URI is configured.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::Store;
use crate::model::{DirectUpload, Image, SigningKey, Variant};
use crate::pagination::{paginate, ListQuery, Page};

type AccountKey = (String, String);

#[derive(Default)]
struct Tables {
    images: HashMap<AccountKey, Image>,
    // BTreeMaps keep list results sorted by account, then id/name
    variants: BTreeMap<AccountKey, Variant>,
    signing_keys: BTreeMap<AccountKey, SigningKey>,
    direct_uploads: HashMap<String, DirectUpload>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

fn key(account_id: &str, id: &str) -> AccountKey {
    (account_id.to_string(), id.to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_image(&self, image: &Image) -> Result<()> {
        self.write()?
            .images
            .insert(key(&image.account_id, &image.id), image.clone());
        Ok(())
    }

    async fn get_image(&self, account_id: &str, image_id: &str) -> Result<Option<Image>> {
        Ok(self.read()?.images.get(&key(account_id, image_id)).cloned())
    }

    async fn update_image(&self, image: &Image) -> Result<bool> {
        let mut tables = self.write()?;
        match tables.images.get_mut(&key(&image.account_id, &image.id)) {
            Some(existing) => {
                *existing = image.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_image(&self, account_id: &str, image_id: &str) -> Result<bool> {
        Ok(self
            .write()?
            .images
            .remove(&key(account_id, image_id))
            .is_some())
    }

    async fn count_images(&self, account_id: &str) -> Result<u64> {
        let tables = self.read()?;
        Ok(tables
            .images
            .values()
            .filter(|i| i.account_id == account_id)
            .count() as u64)
    }

    async fn list_images_offset(
        &self,
        account_id: &str,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<Image>, u64)> {
        let tables = self.read()?;
        let mut images: Vec<&Image> = tables
            .images
            .values()
            .filter(|i| i.account_id == account_id)
            .collect();
        images.sort_by(|a, b| a.uploaded.cmp(&b.uploaded).then_with(|| a.id.cmp(&b.id)));

        let total = images.len() as u64;
        let start = page.saturating_sub(1).saturating_mul(per_page);
        let page = images
            .into_iter()
            .skip(start)
            .take(per_page)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn list_images(&self, account_id: &str, query: &ListQuery) -> Result<Page> {
        let tables = self.read()?;
        let records = tables.images.values().filter(|i| i.account_id == account_id);
        Ok(paginate(records, query))
    }

    async fn create_variant(&self, variant: &Variant) -> Result<bool> {
        let mut tables = self.write()?;
        let k = key(&variant.account_id, &variant.id);
        if tables.variants.contains_key(&k) {
            return Ok(false);
        }
        tables.variants.insert(k, variant.clone());
        Ok(true)
    }

    async fn get_variant(&self, account_id: &str, variant_id: &str) -> Result<Option<Variant>> {
        Ok(self.read()?.variants.get(&key(account_id, variant_id)).cloned())
    }

    async fn list_variants(&self, account_id: &str) -> Result<Vec<Variant>> {
        let tables = self.read()?;
        Ok(tables
            .variants
            .values()
            .filter(|v| v.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn update_variant(&self, variant: &Variant) -> Result<bool> {
        let mut tables = self.write()?;
        match tables.variants.get_mut(&key(&variant.account_id, &variant.id)) {
            Some(existing) => {
                *existing = variant.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_variant(&self, account_id: &str, variant_id: &str) -> Result<bool> {
        Ok(self
            .write()?
            .variants
            .remove(&key(account_id, variant_id))
            .is_some())
    }

    async fn put_signing_key(&self, signing_key: &SigningKey) -> Result<()> {
        self.write()?.signing_keys.insert(
            key(&signing_key.account_id, &signing_key.name),
            signing_key.clone(),
        );
        Ok(())
    }

    async fn list_signing_keys(&self, account_id: &str) -> Result<Vec<SigningKey>> {
        let tables = self.read()?;
        Ok(tables
            .signing_keys
            .values()
            .filter(|k| k.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn delete_signing_key(&self, account_id: &str, name: &str) -> Result<bool> {
        Ok(self
            .write()?
            .signing_keys
            .remove(&key(account_id, name))
            .is_some())
    }

    async fn create_direct_upload(&self, upload: &DirectUpload) -> Result<()> {
        self.write()?
            .direct_uploads
            .insert(upload.id.clone(), upload.clone());
        Ok(())
    }

    async fn get_direct_upload(&self, upload_id: &str) -> Result<Option<DirectUpload>> {
        Ok(self.read()?.direct_uploads.get(upload_id).cloned())
    }

    async fn complete_direct_upload(&self, upload_id: &str) -> Result<bool> {
        let mut tables = self.write()?;
        match tables.direct_uploads.get_mut(upload_id) {
            Some(upload) => {
                upload.completed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
