//! Key-value operations: local store or remote KV servers.
//!
//! The transformation-object metadata records ride on these, but the KV
//! surface is public — applications can use it directly.

use strata_message::{Message, MessageType};
use strata_types::{BackendKind, Semantics, server_index};

use crate::{Client, ClientError};

impl Client {
    fn kv_index(&self, key: &str) -> u32 {
        server_index(key, self.config().server_count(BackendKind::Kv))
    }

    fn require_kv_servers(&self) -> Result<(), ClientError> {
        if self.config().kv_servers.is_empty() {
            return Err(ClientError::BackendUnavailable("kv"));
        }
        Ok(())
    }

    /// Store a value under `(namespace, key)`.
    pub async fn kv_put(
        &self,
        namespace: &str,
        key: &str,
        value: &[u8],
        semantics: &Semantics,
    ) -> Result<(), ClientError> {
        if let Some(store) = self.kv_store() {
            store.put(namespace, key, value)?;
            return Ok(());
        }
        self.require_kv_servers()?;

        let mut request = Message::new(MessageType::KvPut);
        request.set_safety(semantics);
        request.append_str(namespace);
        request.add_operation();
        request.append_str(key);
        request.append_u32(value.len() as u32);
        request.append_bytes(value);

        self.with_connection(BackendKind::Kv, self.kv_index(key), async |connection| {
            request.send(connection.stream()).await?;
            if request.wants_reply() {
                Message::receive_reply(connection.stream(), &request).await?;
            }
            Ok(())
        })
        .await
    }

    /// Look up a value by `(namespace, key)`.
    pub async fn kv_get(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        if let Some(store) = self.kv_store() {
            return Ok(store.get(namespace, key)?);
        }
        self.require_kv_servers()?;

        let mut request = Message::new(MessageType::KvGet);
        request.append_str(namespace);
        request.add_operation();
        request.append_str(key);

        self.with_connection(BackendKind::Kv, self.kv_index(key), async |connection| {
            request.send(connection.stream()).await?;
            let mut reply = Message::receive_reply(connection.stream(), &request).await?;

            let len = reply.get_u32()? as usize;
            if len == 0 {
                return Ok(None);
            }
            Ok(Some(reply.get_bytes(len)?))
        })
        .await
    }

    /// Delete the entry under `(namespace, key)`.
    pub async fn kv_delete(
        &self,
        namespace: &str,
        key: &str,
        semantics: &Semantics,
    ) -> Result<(), ClientError> {
        if let Some(store) = self.kv_store() {
            store.delete(namespace, key)?;
            return Ok(());
        }
        self.require_kv_servers()?;

        let mut request = Message::new(MessageType::KvDelete);
        request.set_safety(semantics);
        request.append_str(namespace);
        request.add_operation();
        request.append_str(key);

        self.with_connection(BackendKind::Kv, self.kv_index(key), async |connection| {
            request.send(connection.stream()).await?;
            if request.wants_reply() {
                Message::receive_reply(connection.stream(), &request).await?;
            }
            Ok(())
        })
        .await
    }

    /// List all values in a namespace.
    ///
    /// Against remote servers only values come back; key listings stay
    /// server-side. Namespaces are dispatched by their first key's server
    /// when local, or by namespace hash when remote.
    pub async fn kv_get_all(&self, namespace: &str) -> Result<Vec<Vec<u8>>, ClientError> {
        self.kv_scan(namespace, None).await
    }

    /// List all values in a namespace whose key starts with `prefix`.
    pub async fn kv_get_by_prefix(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> Result<Vec<Vec<u8>>, ClientError> {
        self.kv_scan(namespace, Some(prefix)).await
    }

    async fn kv_scan(
        &self,
        namespace: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<Vec<u8>>, ClientError> {
        if let Some(store) = self.kv_store() {
            let entries = match prefix {
                Some(prefix) => store.get_by_prefix(namespace, prefix)?,
                None => store.get_all(namespace)?,
            };
            return Ok(entries.into_iter().map(|(_, value)| value).collect());
        }
        self.require_kv_servers()?;

        let ty = match prefix {
            Some(_) => MessageType::KvGetByPrefix,
            None => MessageType::KvGetAll,
        };
        let mut request = Message::new(ty);
        request.append_str(namespace);
        if let Some(prefix) = prefix {
            request.append_str(prefix);
        }

        let index = self.kv_index(namespace);
        self.with_connection(BackendKind::Kv, index, async |connection| {
            request.send(connection.stream()).await?;
            let mut reply = Message::receive_reply(connection.stream(), &request).await?;

            // Values stream until a zero length marks the end.
            let mut values = Vec::new();
            loop {
                let len = reply.get_u32()? as usize;
                if len == 0 {
                    break;
                }
                values.push(reply.get_bytes(len)?);
            }
            Ok(values)
        })
        .await
    }
}
