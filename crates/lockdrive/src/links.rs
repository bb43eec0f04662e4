//! The keyed link tree
//!
//! [`Links`] materializes the encrypted directory tree of the primary
//! volume and keeps it indexed by id and by canonical path. Links are
//! stored in an arena keyed by link id; each node records its parent id
//! and a set of child ids, so ownership stays with the store and cycles
//! are structurally impossible. Lookups hand out owned snapshots.
//!
//! The store is shared between the foreground and the event loop; every
//! mutation happens under one lock and rebuilds both indexes before
//! releasing it, so observers never see a half-rebuilt tree.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use futures::future::{try_join_all, BoxFuture};

use crate::api::{DriveClient, LinkEvent, LinkId, LinkKind, LinkState, RemoteLink};
use crate::config::DriveConfig;
use crate::crypto::{self, Keyring};
use crate::error::{DriveError, DriveResult};
use crate::limiter::Limiter;
use crate::link::{Link, XAttrs};
use crate::share::Share;
use crate::user::User;
use crate::volume::Volume;

/// Canonicalize a path by removing redundant separators and `.` segments.
pub fn clean_path(path: &str) -> String {
    let mut out = String::new();
    for part in path.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Join a child name onto a canonical parent path.
fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

struct LinkNode {
    link: Link,
    children: BTreeSet<LinkId>,
}

#[derive(Default)]
struct LinksInner {
    volume: Option<Volume>,
    share: Option<Share>,
    root_id: Option<LinkId>,
    nodes: HashMap<LinkId, LinkNode>,
    by_path: HashMap<String, LinkId>,
}

struct BuiltNode {
    link: Link,
    children: Vec<BuiltNode>,
}

/// The in-memory link store for the session's primary share.
#[derive(Clone)]
pub struct Links {
    client: Arc<dyn DriveClient>,
    user: Arc<User>,
    limiter: Arc<Limiter>,
    inner: Arc<Mutex<LinksInner>>,
}

impl Links {
    pub fn new(client: Arc<dyn DriveClient>, user: Arc<User>, config: &DriveConfig) -> Self {
        Self {
            client,
            user,
            limiter: Arc::new(Limiter::new(config.list_rate, config.list_burst)),
            inner: Arc::new(Mutex::new(LinksInner::default())),
        }
    }

    /// Materialize the tree: volume, share keyring, root, descendants.
    ///
    /// Fails as a whole if any part fails; there is no partial tree.
    pub async fn init(&self) -> DriveResult<()> {
        let volume = self.get_volume().await?;
        let share = self.get_share(&volume).await?;

        {
            let mut inner = self.inner.lock().expect("links lock poisoned");
            inner.volume = Some(volume);
            inner.share = Some(share.clone());
        }

        self.get_root(&share).await
    }

    async fn get_volume(&self) -> DriveResult<Volume> {
        let volumes = self.client.list_volumes().await?;
        volumes
            .into_iter()
            .find(|v| v.state == crate::api::VolumeState::Active)
            .map(Volume::from)
            .ok_or(DriveError::MainVolumeNotFound)
    }

    async fn get_share(&self, volume: &Volume) -> DriveResult<Share> {
        let remote = self.client.get_share(volume.share_id()).await?;

        let address = self
            .user
            .address_from_id(&remote.address_id)
            .ok_or(DriveError::ShareAddressNotFound)?;

        let keyring = crypto::unlock_node_key(
            address.keyring(),
            address.keyring(),
            &remote.key,
            &remote.passphrase,
            &remote.passphrase_signature,
        )?;

        Ok(Share::new(
            remote.id,
            remote.link_id,
            address.id().clone(),
            address.email().to_string(),
            keyring,
        ))
    }

    async fn get_root(&self, share: &Share) -> DriveResult<()> {
        let remote_root = self.client.get_link(share.id(), share.link_id()).await?;
        let root = self.build_subtree(share.clone(), remote_root, None).await?;

        let mut inner = self.inner.lock().expect("links lock poisoned");
        inner.nodes.clear();
        let root_id = root.link.id().clone();
        Self::install(&mut inner, root);
        inner.root_id = Some(root_id);
        Self::rebuild_indexes(&mut inner);

        tracing::info!(links = inner.nodes.len(), "link tree materialized");
        Ok(())
    }

    /// Recursively decode a remote link and fetch its active descendants.
    ///
    /// Child listings run concurrently but are bounded by the rate
    /// limiter; inactive links are skipped.
    fn build_subtree(
        &self,
        share: Share,
        remote: RemoteLink,
        parent: Option<Link>,
    ) -> BoxFuture<'_, DriveResult<BuiltNode>> {
        Box::pin(async move {
            let link = self.decode_link(&share, &remote, parent.as_ref())?;

            let mut children = Vec::new();
            if link.is_dir() {
                self.limiter.wait().await;
                let remote_children = self
                    .client
                    .list_children(share.id(), link.id(), true)
                    .await?;

                let futures: Vec<_> = remote_children
                    .into_iter()
                    .filter(|child| child.state == LinkState::Active)
                    .map(|child| self.build_subtree(share.clone(), child, Some(link.clone())))
                    .collect();

                children = try_join_all(futures).await?;
            }

            Ok(BuiltNode { link, children })
        })
    }

    fn install(inner: &mut LinksInner, built: BuiltNode) {
        let id = built.link.id().clone();
        let children: BTreeSet<LinkId> =
            built.children.iter().map(|c| c.link.id().clone()).collect();

        inner.nodes.insert(
            id,
            LinkNode {
                link: built.link,
                children,
            },
        );

        for child in built.children {
            Self::install(inner, child);
        }
    }

    /// Decode one remote link under its parent's keyring.
    fn decode_link(
        &self,
        share: &Share,
        remote: &RemoteLink,
        parent: Option<&Link>,
    ) -> DriveResult<Link> {
        let sign_address = self
            .user
            .address_from_email(&remote.signature_email)
            .ok_or(DriveError::SignatureAddressNotFound)?;
        let name_sign_address = self
            .user
            .address_from_email(&remote.name_signature_email)
            .ok_or(DriveError::NameSignatureAddressNotFound)?;

        let parent_keyring = match parent {
            Some(parent) => parent.keyring(),
            None => share.keyring(),
        };

        let keyring = crypto::unlock_node_key(
            parent_keyring,
            sign_address.keyring(),
            &remote.node_key,
            &remote.node_passphrase,
            &remote.node_passphrase_signature,
        )?;

        let name_bytes =
            crypto::decrypt_signed(&remote.name, parent_keyring, name_sign_address.keyring())?;
        let name = String::from_utf8(name_bytes)
            .map_err(|_| DriveError::Crypto(anyhow::anyhow!("link name is not utf-8").into()))?;

        // Attribute payloads may be signed by the address or by the node
        // key itself, so verification goes against both.
        let verifier = Keyring::merged(&[sign_address.keyring(), &keyring]);

        let attrs = match &remote.x_attrs {
            Some(blob) => {
                let json = crypto::decrypt_signed(blob, &keyring, &verifier)?;
                Some(XAttrs::from_json(&json)?.into_attributes(remote.mime_type.clone())?)
            }
            None => None,
        };

        let mut revision_id = None;
        let mut session_key = None;
        let mut hash_key = None;

        match remote.kind {
            LinkKind::File => {
                let file = remote.file.as_ref().ok_or_else(|| {
                    DriveError::Crypto(anyhow::anyhow!("file link missing file properties").into())
                })?;
                revision_id = Some(file.active_revision_id.clone());
                session_key = Some(crypto::unwrap_session_key(
                    &file.content_key_packet,
                    &keyring,
                )?);
            }
            LinkKind::Folder => {
                let folder = remote.folder.as_ref().ok_or_else(|| {
                    DriveError::Crypto(
                        anyhow::anyhow!("folder link missing folder properties").into(),
                    )
                })?;
                hash_key = Some(crypto::decrypt_signed(
                    &folder.node_hash_key,
                    &keyring,
                    &verifier,
                )?);
            }
        }

        Ok(Link {
            id: remote.id.clone(),
            parent_id: parent.map(|p| p.id().clone()),
            kind: remote.kind,
            name,
            path: String::new(),
            name_hash: remote.name_hash.clone(),
            size: remote.size,
            create_time: remote.create_time,
            modify_time: remote.modify_time,
            signature_email: remote.signature_email.clone(),
            name_signature_email: remote.name_signature_email.clone(),
            node_passphrase: remote.node_passphrase.clone(),
            node_passphrase_signature: remote.node_passphrase_signature.clone(),
            keyring,
            revision_id,
            session_key,
            hash_key,
            attrs,
        })
    }

    /// Recompute every path and the path index by a depth-first walk.
    fn rebuild_indexes(inner: &mut LinksInner) {
        inner.by_path.clear();

        let Some(root_id) = inner.root_id.clone() else {
            return;
        };

        let mut stack = vec![(root_id, String::from("/"))];
        while let Some((id, path)) = stack.pop() {
            let Some(node) = inner.nodes.get_mut(&id) else {
                continue;
            };
            node.link.path = path.clone();
            let children: Vec<LinkId> = node.children.iter().cloned().collect();
            inner.by_path.insert(path.clone(), id);

            for child_id in children {
                if let Some(child) = inner.nodes.get(&child_id) {
                    stack.push((child_id, join_path(&path, child.link.name())));
                }
            }
        }
    }

    //
    // ACCESSORS
    //

    pub fn volume(&self) -> Volume {
        self.inner
            .lock()
            .expect("links lock poisoned")
            .volume
            .clone()
            .expect("links not initialized")
    }

    pub fn share(&self) -> Share {
        self.inner
            .lock()
            .expect("links lock poisoned")
            .share
            .clone()
            .expect("links not initialized")
    }

    pub fn root(&self) -> Option<Link> {
        let inner = self.inner.lock().expect("links lock poisoned");
        let root_id = inner.root_id.clone()?;
        inner.nodes.get(&root_id).map(|n| n.link.clone())
    }

    pub fn link_from_id(&self, id: &LinkId) -> Option<Link> {
        let inner = self.inner.lock().expect("links lock poisoned");
        inner.nodes.get(id).map(|n| n.link.clone())
    }

    pub fn link_from_path(&self, path: &str) -> Option<Link> {
        let path = clean_path(path);
        let inner = self.inner.lock().expect("links lock poisoned");
        let id = inner.by_path.get(&path)?;
        inner.nodes.get(id).map(|n| n.link.clone())
    }

    /// Snapshots of a link's children; `None` for unknown ids.
    pub fn children_of(&self, id: &LinkId) -> Option<Vec<Link>> {
        let inner = self.inner.lock().expect("links lock poisoned");
        let node = inner.nodes.get(id)?;
        Some(
            node.children
                .iter()
                .filter_map(|child| inner.nodes.get(child).map(|n| n.link.clone()))
                .collect(),
        )
    }

    /// Number of links currently in the store.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("links lock poisoned").nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    //
    // EVENT APPLICATION
    //

    /// Apply one link event to the tree.
    ///
    /// Active state on an unknown link creates it, active state on a
    /// known link updates it in place (preserving its children set), and
    /// non-active state on a known link detaches the whole subtree.
    pub fn on_event(&self, event: &LinkEvent) -> DriveResult<()> {
        let share = self.share();
        let mut inner = self.inner.lock().expect("links lock poisoned");

        let known = inner.nodes.contains_key(&event.link.id);
        if event.link.state == LinkState::Active {
            if known {
                self.on_update(&share, &mut inner, &event.link)
            } else {
                self.on_create(&share, &mut inner, &event.link)
            }
        } else {
            if known {
                Self::on_delete(&mut inner, &event.link.id);
            }
            Ok(())
        }
    }

    fn on_create(
        &self,
        share: &Share,
        inner: &mut LinksInner,
        remote: &RemoteLink,
    ) -> DriveResult<()> {
        let Some(parent_id) = &remote.parent_id else {
            tracing::warn!(link = %remote.id, "create event without a parent, skipping");
            return Ok(());
        };
        let Some(parent) = inner.nodes.get(parent_id).map(|n| n.link.clone()) else {
            tracing::warn!(link = %remote.id, parent = %parent_id, "create event for unknown parent, skipping");
            return Ok(());
        };

        let link = self.decode_link(share, remote, Some(&parent))?;
        let id = link.id().clone();

        inner.nodes.insert(
            id.clone(),
            LinkNode {
                link,
                children: BTreeSet::new(),
            },
        );
        if let Some(parent_node) = inner.nodes.get_mut(parent_id) {
            parent_node.children.insert(id.clone());
        }

        Self::rebuild_indexes(inner);
        tracing::debug!(link = %id, "link created from event");
        Ok(())
    }

    fn on_update(
        &self,
        share: &Share,
        inner: &mut LinksInner,
        remote: &RemoteLink,
    ) -> DriveResult<()> {
        let Some(new_parent_id) = &remote.parent_id else {
            tracing::warn!(link = %remote.id, "update event without a parent, skipping");
            return Ok(());
        };
        let Some(new_parent) = inner.nodes.get(new_parent_id).map(|n| n.link.clone()) else {
            tracing::warn!(link = %remote.id, parent = %new_parent_id, "update event for unknown parent, skipping");
            return Ok(());
        };

        let link = self.decode_link(share, remote, Some(&new_parent))?;
        let id = link.id().clone();

        // The event describes the node, not its subtree: keep the
        // previous children set and let the index rebuild recompute
        // descendant paths.
        let old_parent_id = {
            let node = inner.nodes.get_mut(&id).expect("update target is known");
            let old_parent_id = node.link.parent_id().cloned();
            node.link = link;
            old_parent_id
        };

        if old_parent_id.as_ref() != Some(new_parent_id) {
            if let Some(old_parent_id) = &old_parent_id {
                if let Some(old_parent) = inner.nodes.get_mut(old_parent_id) {
                    old_parent.children.remove(&id);
                }
            }
            if let Some(parent_node) = inner.nodes.get_mut(new_parent_id) {
                parent_node.children.insert(id.clone());
            }
        }

        Self::rebuild_indexes(inner);
        tracing::debug!(link = %id, "link updated from event");
        Ok(())
    }

    fn on_delete(inner: &mut LinksInner, id: &LinkId) {
        let Some(node) = inner.nodes.remove(id) else {
            return;
        };

        if let Some(parent_id) = node.link.parent_id() {
            if let Some(parent) = inner.nodes.get_mut(parent_id) {
                parent.children.remove(id);
            }
        }

        // The subtree goes with its root so the id and path indexes
        // always agree.
        let mut stack: Vec<LinkId> = node.children.into_iter().collect();
        while let Some(child_id) = stack.pop() {
            if let Some(child) = inner.nodes.remove(&child_id) {
                stack.extend(child.children);
            }
        }

        Self::rebuild_indexes(inner);
        tracing::debug!(link = %id, "link removed from event");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path(""), "/");
        assert_eq!(clean_path("/docs"), "/docs");
        assert_eq!(clean_path("docs"), "/docs");
        assert_eq!(clean_path("//docs///a.txt"), "/docs/a.txt");
        assert_eq!(clean_path("/docs/./a.txt"), "/docs/a.txt");
        assert_eq!(clean_path("/docs/a.txt/"), "/docs/a.txt");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/", "docs"), "/docs");
        assert_eq!(join_path("/docs", "a.txt"), "/docs/a.txt");
    }
}
