use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use sha1::{Digest as _, Sha1};
use sha2::Sha256;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::api::{
    AddressId, Auth, AuthObserver, BlockUploadLink, BlockUploadRequest, ClientError,
    CommitRevisionRequest, Connector, CreateFileRequest, CreateFileResponse, CreateFolderRequest,
    CreateFolderResponse, CreateRevisionResponse, DriveClient, EventId, KeySalt, LinkEvent,
    LinkEventType, LinkId, LinkKind, LinkState, MoveLinkRequest, PasswordMode,
    RemoteAddress, RemoteBlock, RemoteFileProperties, RemoteFolderProperties, RemoteKey,
    RemoteLink, RemoteRevision, RemoteShare, RemoteUser, RemoteVolume, RevisionId, ShareEvents,
    ShareId, VolumeId, VolumeState,
};
use crate::application::{Application, Credentials};
use crate::crypto::{
    self, armor, Keyring, SecretKey, SessionKey,
};
use crate::link::{XAttrs, XAttrsCommon, SHA1_DIGEST, XATTR_TIME_FORMAT};
use crate::writer::BLOCK_SIZE;

/// Account shape for a seeded test server.
#[derive(Debug, Clone, Default)]
pub struct TestServerOptions {
    /// Expected TOTP code; enables the second factor.
    pub two_fa: Option<String>,
    /// Mailbox password; enables two-password mode.
    pub mailbox_password: Option<String>,
}

struct RevisionRecord {
    link_id: LinkId,
    committed: bool,
    blocks: Vec<RemoteBlock>,
}

struct BlockRecord {
    token: String,
    link_id: LinkId,
    revision_id: RevisionId,
    index: u32,
    hash: String,
    enc_signature: String,
    data: Option<Bytes>,
}

struct ServerState {
    username: String,
    password: String,
    options: TestServerOptions,

    salt: Vec<u8>,
    user_key_id: String,

    remote_user: RemoteUser,
    remote_addresses: Vec<RemoteAddress>,
    address_id: AddressId,
    address_email: String,
    address_keyring: Keyring,

    volume: RemoteVolume,
    share: RemoteShare,
    share_keyring: Keyring,

    links: HashMap<LinkId, RemoteLink>,
    revisions: HashMap<RevisionId, RevisionRecord>,
    blocks: HashMap<String, BlockRecord>,
    events: Vec<LinkEvent>,

    fail_next_block_upload: bool,

    observers: Vec<Arc<dyn AuthObserver>>,
}

/// An in-memory drive service implementing the transport contract.
#[derive(Clone)]
pub struct TestServer {
    state: Arc<Mutex<ServerState>>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_options(TestServerOptions::default())
    }

    /// Seed an account with the given auth shape.
    ///
    /// The whole identity is fabricated with real key material: locked
    /// user and address keys, a share key packet under the address
    /// keyring, and a root folder under the share keyring.
    pub fn with_options(options: TestServerOptions) -> Self {
        let username = "alice".to_string();
        let password = "correct horse battery staple".to_string();

        let effective_password = options
            .mailbox_password
            .clone()
            .unwrap_or_else(|| password.clone());

        let salt = crypto::random_bytes::<16>().to_vec();
        let salted_pass = crypto::salt_key_pass(effective_password.as_bytes(), &salt);

        // User and address keys, locked under the salted pass
        let user_key = SecretKey::generate();
        let user_key_id = new_id();
        let remote_user = RemoteUser {
            id: new_id(),
            keys: vec![RemoteKey {
                id: user_key_id.clone(),
                private_key: Keyring::lock_key(&user_key, &salted_pass)
                    .expect("lock user key"),
                primary: true,
            }],
        };

        let address_key = SecretKey::generate();
        let address_id = AddressId::from(new_id().as_str());
        let address_email = "alice@lockdrive.test".to_string();
        let address_keyring = Keyring::from_secret_key(address_key.clone());
        let remote_addresses = vec![RemoteAddress {
            id: address_id.clone(),
            email: address_email.clone(),
            keys: vec![RemoteKey {
                id: new_id(),
                private_key: Keyring::lock_key(&address_key, &salted_pass)
                    .expect("lock address key"),
                primary: true,
            }],
        }];

        // Share key material under the owner address
        let share_keys = crypto::generate_node_keys(&address_keyring, &address_keyring)
            .expect("share keys");
        let share_keyring = crypto::unlock_node_key(
            &address_keyring,
            &address_keyring,
            &share_keys.key,
            &share_keys.passphrase,
            &share_keys.signature,
        )
        .expect("share keyring");

        // Root folder under the share keyring
        let root_id = LinkId::from(new_id().as_str());
        let root_keys =
            crypto::generate_node_keys(&share_keyring, &address_keyring).expect("root keys");
        let root_keyring = crypto::unlock_node_key(
            &share_keyring,
            &address_keyring,
            &root_keys.key,
            &root_keys.passphrase,
            &root_keys.signature,
        )
        .expect("root keyring");
        let root_hash_key = crypto::random_bytes::<32>();

        let root = RemoteLink {
            id: root_id.clone(),
            parent_id: None,
            kind: LinkKind::Folder,
            state: LinkState::Active,
            name: crypto::encrypt_signed(b"root", &share_keyring, &address_keyring)
                .expect("root name"),
            name_hash: String::new(),
            mime_type: String::new(),
            size: 0,
            create_time: now_unix(),
            modify_time: now_unix(),
            signature_email: address_email.clone(),
            name_signature_email: address_email.clone(),
            node_key: root_keys.key,
            node_passphrase: root_keys.passphrase,
            node_passphrase_signature: root_keys.signature,
            x_attrs: None,
            file: None,
            folder: Some(RemoteFolderProperties {
                node_hash_key: crypto::encrypt_signed(
                    &root_hash_key,
                    &root_keyring,
                    &root_keyring,
                )
                .expect("root hash key"),
            }),
        };

        let share = RemoteShare {
            id: ShareId::from(new_id().as_str()),
            link_id: root_id.clone(),
            address_id: address_id.clone(),
            key: share_keys.key,
            passphrase: share_keys.passphrase,
            passphrase_signature: share_keys.signature,
        };

        let volume = RemoteVolume {
            id: VolumeId::from(new_id().as_str()),
            share_id: share.id.clone(),
            state: VolumeState::Active,
        };

        let mut links = HashMap::new();
        links.insert(root_id, root);

        Self {
            state: Arc::new(Mutex::new(ServerState {
                username,
                password,
                options,
                salt,
                user_key_id,
                remote_user,
                remote_addresses,
                address_id,
                address_email,
                address_keyring,
                volume,
                share,
                share_keyring,
                links,
                revisions: HashMap::new(),
                blocks: HashMap::new(),
                events: Vec::new(),
                fail_next_block_upload: false,
                observers: Vec::new(),
            })),
        }
    }

    /// Credentials matching the seeded account.
    pub fn credentials(&self) -> Credentials {
        let state = self.lock();
        Credentials {
            username: state.username.clone(),
            password: state.password.clone(),
            two_fa: state.options.two_fa.clone().unwrap_or_default(),
            mailbox_password: state.options.mailbox_password.clone().unwrap_or_default(),
        }
    }

    /// An application wired to this server.
    pub fn application(&self) -> Application {
        Application::new(Arc::new(self.clone()))
    }

    pub fn share_id(&self) -> ShareId {
        self.lock().share.id.clone()
    }

    pub fn root_id(&self) -> LinkId {
        self.lock().share.link_id.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().expect("test server lock poisoned")
    }

    //
    // REMOTE-SIDE FABRICATION
    //

    /// Create a folder on the server, as another client would.
    ///
    /// Emits the create event; the local session sees it on its next
    /// drain.
    pub fn seed_folder(&self, parent_id: &LinkId, name: &str) -> LinkId {
        let mut state = self.lock();

        let parent_keyring = state.keyring_of(parent_id);
        let parent_hash_key = state.hash_key_of(parent_id);
        let address_keyring = state.address_keyring.clone();

        let node_keys = crypto::generate_node_keys(&parent_keyring, &address_keyring)
            .expect("node keys");
        let keyring = crypto::unlock_node_key(
            &parent_keyring,
            &address_keyring,
            &node_keys.key,
            &node_keys.passphrase,
            &node_keys.signature,
        )
        .expect("node keyring");
        let hash_key = crypto::random_bytes::<32>();

        let link = RemoteLink {
            id: LinkId::from(new_id().as_str()),
            parent_id: Some(parent_id.clone()),
            kind: LinkKind::Folder,
            state: LinkState::Active,
            name: crypto::encrypt_signed(name.as_bytes(), &parent_keyring, &address_keyring)
                .expect("name"),
            name_hash: crypto::hash_name(&parent_hash_key, name),
            mime_type: String::new(),
            size: 0,
            create_time: now_unix(),
            modify_time: now_unix(),
            signature_email: state.address_email.clone(),
            name_signature_email: state.address_email.clone(),
            node_key: node_keys.key,
            node_passphrase: node_keys.passphrase,
            node_passphrase_signature: node_keys.signature,
            x_attrs: None,
            file: None,
            folder: Some(RemoteFolderProperties {
                node_hash_key: crypto::encrypt_signed(&hash_key, &keyring, &keyring)
                    .expect("hash key"),
            }),
        };

        let id = link.id.clone();
        state.links.insert(id.clone(), link.clone());
        state.emit(LinkEventType::Create, link);
        id
    }

    /// Create a committed file on the server, as another client would.
    pub fn seed_file(&self, parent_id: &LinkId, name: &str, content: &[u8]) -> LinkId {
        let mut state = self.lock();

        let parent_keyring = state.keyring_of(parent_id);
        let parent_hash_key = state.hash_key_of(parent_id);
        let address_keyring = state.address_keyring.clone();
        let address_email = state.address_email.clone();

        let node_keys = crypto::generate_node_keys(&parent_keyring, &address_keyring)
            .expect("node keys");
        let keyring = crypto::unlock_node_key(
            &parent_keyring,
            &address_keyring,
            &node_keys.key,
            &node_keys.passphrase,
            &node_keys.signature,
        )
        .expect("node keyring");

        let session_key = SessionKey::generate();
        let (content_key_packet, content_key_signature) =
            crypto::wrap_session_key(&session_key, &keyring).expect("session key packet");

        let link_id = LinkId::from(new_id().as_str());
        let revision_id = RevisionId::from(new_id().as_str());

        // Chunk, encrypt and store blocks; an empty file is one block.
        let chunks: Vec<&[u8]> = if content.is_empty() {
            vec![&[]]
        } else {
            content.chunks(BLOCK_SIZE).collect()
        };

        let mut blocks = Vec::new();
        let mut block_sizes = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let encrypted = session_key.encrypt(chunk).expect("encrypt block");
            let hash = BASE64.encode(Sha256::digest(&encrypted));
            let signature = address_keyring
                .sign_detached_encrypted(chunk, &keyring)
                .expect("block signature");

            let url = format!("mem://block/{}", new_id());
            let token = new_id();
            state.blocks.insert(
                url.clone(),
                BlockRecord {
                    token: token.clone(),
                    link_id: link_id.clone(),
                    revision_id: revision_id.clone(),
                    index: (i + 1) as u32,
                    hash: hash.clone(),
                    enc_signature: signature.clone(),
                    data: Some(Bytes::from(encrypted)),
                },
            );

            blocks.push(RemoteBlock {
                index: (i + 1) as u32,
                url,
                token,
                hash,
                enc_signature: signature,
                signature_email: address_email.clone(),
            });
            block_sizes.push(chunk.len() as u64);
        }

        let mut digests = BTreeMap::new();
        digests.insert(
            SHA1_DIGEST.to_string(),
            hex::encode(Sha1::digest(content)),
        );
        let xattrs = XAttrs {
            common: XAttrsCommon {
                modification_time: OffsetDateTime::now_utc()
                    .format(XATTR_TIME_FORMAT)
                    .expect("time format"),
                size: content.len() as u64,
                block_sizes,
                digests,
            },
        };
        let x_attrs =
            crypto::encrypt_signed(&xattrs.to_json().expect("xattr json"), &keyring, &address_keyring)
                .expect("xattrs");

        state.revisions.insert(
            revision_id.clone(),
            RevisionRecord {
                link_id: link_id.clone(),
                committed: true,
                blocks,
            },
        );

        let link = RemoteLink {
            id: link_id.clone(),
            parent_id: Some(parent_id.clone()),
            kind: LinkKind::File,
            state: LinkState::Active,
            name: crypto::encrypt_signed(name.as_bytes(), &parent_keyring, &address_keyring)
                .expect("name"),
            name_hash: crypto::hash_name(&parent_hash_key, name),
            mime_type: "application/octet-stream".to_string(),
            size: content.len() as u64,
            create_time: now_unix(),
            modify_time: now_unix(),
            signature_email: state.address_email.clone(),
            name_signature_email: state.address_email.clone(),
            node_key: node_keys.key,
            node_passphrase: node_keys.passphrase,
            node_passphrase_signature: node_keys.signature,
            x_attrs: Some(x_attrs),
            file: Some(RemoteFileProperties {
                content_key_packet,
                content_key_signature,
                active_revision_id: revision_id,
            }),
            folder: None,
        };

        state.links.insert(link_id.clone(), link.clone());
        state.emit(LinkEventType::Create, link);
        link_id
    }

    /// Flip a byte in one stored block of a file's active revision, so
    /// its declared hash no longer matches the stored ciphertext.
    pub fn corrupt_block(&self, link_id: &LinkId) {
        let mut state = self.lock();

        let revision_id = state
            .links
            .get(link_id)
            .and_then(|link| link.file.as_ref())
            .map(|file| file.active_revision_id.clone())
            .expect("link is a file");

        let url = state
            .revisions
            .get(&revision_id)
            .and_then(|revision| revision.blocks.first())
            .map(|block| block.url.clone())
            .expect("revision has blocks");

        let record = state.blocks.get_mut(&url).expect("block is stored");
        let mut data = record.data.take().expect("block is uploaded").to_vec();
        data[0] ^= 0xff;
        record.data = Some(Bytes::from(data));
    }

    /// The raw link record as the server holds it; for re-delivering
    /// events by hand.
    pub fn remote_link(&self, link_id: &LinkId) -> RemoteLink {
        self.lock().links.get(link_id).cloned().expect("link exists")
    }

    /// Make the next block upload fail with a server error.
    pub fn fail_next_block_upload(&self) {
        self.lock().fail_next_block_upload = true;
    }

    /// Rotate the transport tokens, firing the auth observers.
    pub fn rotate_tokens(&self) -> Auth {
        let state = self.lock();
        let auth = Auth {
            uid: "uid-1".to_string(),
            access_token: new_id(),
            refresh_token: new_id(),
            two_factor: state.options.two_fa.is_some(),
            password_mode: state.password_mode(),
        };
        for observer in &state.observers {
            observer.tokens_updated(&auth);
        }
        auth
    }

    /// De-authenticate, firing the auth observers.
    pub fn expire_session(&self) {
        let state = self.lock();
        for observer in &state.observers {
            observer.tokens_expired();
        }
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    fn password_mode(&self) -> PasswordMode {
        if self.options.mailbox_password.is_some() {
            PasswordMode::Two
        } else {
            PasswordMode::Single
        }
    }

    fn emit(&mut self, event_type: LinkEventType, link: RemoteLink) {
        self.events.push(LinkEvent { event_type, link });
    }

    /// Walk the parent chain unlocking node keyrings from the share
    /// keyring down, the same way a client would.
    fn keyring_of(&self, link_id: &LinkId) -> Keyring {
        let link = self.links.get(link_id).expect("link exists");
        let parent_keyring = match &link.parent_id {
            None => self.share_keyring.clone(),
            Some(parent_id) => self.keyring_of(parent_id),
        };
        crypto::unlock_node_key(
            &parent_keyring,
            &self.address_keyring,
            &link.node_key,
            &link.node_passphrase,
            &link.node_passphrase_signature,
        )
        .expect("node keyring unlocks")
    }

    fn hash_key_of(&self, link_id: &LinkId) -> Vec<u8> {
        let link = self.links.get(link_id).expect("link exists");
        let folder = link.folder.as_ref().expect("link is a folder");
        let keyring = self.keyring_of(link_id);
        let verifier = Keyring::merged(&[&keyring, &self.address_keyring]);
        crypto::decrypt_signed(&folder.node_hash_key, &keyring, &verifier)
            .expect("hash key decrypts")
    }

    fn check_share(&self, share_id: &ShareId) -> Result<(), ClientError> {
        if share_id != &self.share.id {
            return Err(ClientError::status(404, "unknown share"));
        }
        Ok(())
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[async_trait]
impl Connector for TestServer {
    async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(Arc<dyn DriveClient>, Auth), ClientError> {
        let state = self.lock();
        if username != state.username || password != state.password {
            return Err(ClientError::status(401, "invalid credentials"));
        }

        let auth = Auth {
            uid: "uid-1".to_string(),
            access_token: new_id(),
            refresh_token: new_id(),
            two_factor: state.options.two_fa.is_some(),
            password_mode: state.password_mode(),
        };
        drop(state);

        let client: Arc<dyn DriveClient> = Arc::new(self.clone());
        Ok((client, auth))
    }

    fn restore(
        &self,
        _uid: &str,
        _access_token: &str,
        _refresh_token: &str,
    ) -> Arc<dyn DriveClient> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl DriveClient for TestServer {
    async fn get_user(&self) -> Result<RemoteUser, ClientError> {
        Ok(self.lock().remote_user.clone())
    }

    async fn get_addresses(&self) -> Result<Vec<RemoteAddress>, ClientError> {
        Ok(self.lock().remote_addresses.clone())
    }

    async fn get_key_salts(&self) -> Result<Vec<KeySalt>, ClientError> {
        let state = self.lock();
        Ok(vec![KeySalt {
            key_id: state.user_key_id.clone(),
            salt: armor(&state.salt),
        }])
    }

    async fn submit_two_factor(&self, code: &str) -> Result<(), ClientError> {
        let state = self.lock();
        match &state.options.two_fa {
            Some(expected) if expected == code => Ok(()),
            Some(_) => Err(ClientError::status(401, "invalid 2fa code")),
            None => Err(ClientError::status(400, "2fa not enabled")),
        }
    }

    fn set_auth_observer(&self, observer: Arc<dyn AuthObserver>) {
        self.lock().observers.push(observer);
    }

    async fn list_volumes(&self) -> Result<Vec<RemoteVolume>, ClientError> {
        Ok(vec![self.lock().volume.clone()])
    }

    async fn get_share(&self, share_id: &ShareId) -> Result<RemoteShare, ClientError> {
        let state = self.lock();
        state.check_share(share_id)?;
        Ok(state.share.clone())
    }

    async fn get_link(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
    ) -> Result<RemoteLink, ClientError> {
        let state = self.lock();
        state.check_share(share_id)?;
        state
            .links
            .get(link_id)
            .cloned()
            .ok_or_else(|| ClientError::status(404, "unknown link"))
    }

    async fn list_children(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
        show_all: bool,
    ) -> Result<Vec<RemoteLink>, ClientError> {
        let state = self.lock();
        state.check_share(share_id)?;
        Ok(state
            .links
            .values()
            .filter(|link| link.parent_id.as_ref() == Some(link_id))
            .filter(|link| show_all || link.state == LinkState::Active)
            .cloned()
            .collect())
    }

    async fn latest_event_id(&self, share_id: &ShareId) -> Result<EventId, ClientError> {
        let state = self.lock();
        state.check_share(share_id)?;
        Ok(EventId(state.events.len().to_string()))
    }

    async fn share_events(
        &self,
        share_id: &ShareId,
        cursor: &EventId,
    ) -> Result<ShareEvents, ClientError> {
        let state = self.lock();
        state.check_share(share_id)?;

        let from: usize = cursor
            .as_str()
            .parse()
            .map_err(|_| ClientError::status(400, "bad event cursor"))?;
        let events: Vec<LinkEvent> = state.events.get(from..).unwrap_or(&[]).to_vec();

        Ok(ShareEvents {
            next_id: EventId(state.events.len().to_string()),
            refresh: false,
            events,
        })
    }

    async fn create_file(
        &self,
        share_id: &ShareId,
        request: CreateFileRequest,
    ) -> Result<CreateFileResponse, ClientError> {
        let mut state = self.lock();
        state.check_share(share_id)?;

        if !state.links.contains_key(&request.parent_id) {
            return Err(ClientError::status(404, "unknown parent"));
        }
        let duplicate = state.links.values().any(|link| {
            link.parent_id.as_ref() == Some(&request.parent_id)
                && link.state == LinkState::Active
                && link.name_hash == request.name_hash
        });
        if duplicate {
            return Err(ClientError::status(409, "name already taken"));
        }

        let link_id = LinkId::from(new_id().as_str());
        let revision_id = RevisionId::from(new_id().as_str());

        let link = RemoteLink {
            id: link_id.clone(),
            parent_id: Some(request.parent_id),
            kind: LinkKind::File,
            state: LinkState::Active,
            name: request.name,
            name_hash: request.name_hash,
            mime_type: request.mime_type,
            size: 0,
            create_time: now_unix(),
            modify_time: now_unix(),
            signature_email: request.signature_address.clone(),
            name_signature_email: request.signature_address,
            node_key: request.node_key,
            node_passphrase: request.node_passphrase,
            node_passphrase_signature: request.node_passphrase_signature,
            x_attrs: None,
            file: Some(RemoteFileProperties {
                content_key_packet: request.content_key_packet,
                content_key_signature: request.content_key_signature,
                active_revision_id: revision_id.clone(),
            }),
            folder: None,
        };

        state.revisions.insert(
            revision_id.clone(),
            RevisionRecord {
                link_id: link_id.clone(),
                committed: false,
                blocks: Vec::new(),
            },
        );
        state.links.insert(link_id.clone(), link.clone());
        state.emit(LinkEventType::Create, link);

        Ok(CreateFileResponse {
            id: link_id,
            revision_id,
        })
    }

    async fn create_folder(
        &self,
        share_id: &ShareId,
        request: CreateFolderRequest,
    ) -> Result<CreateFolderResponse, ClientError> {
        let mut state = self.lock();
        state.check_share(share_id)?;

        if !state.links.contains_key(&request.parent_id) {
            return Err(ClientError::status(404, "unknown parent"));
        }
        let duplicate = state.links.values().any(|link| {
            link.parent_id.as_ref() == Some(&request.parent_id)
                && link.state == LinkState::Active
                && link.name_hash == request.name_hash
        });
        if duplicate {
            return Err(ClientError::status(409, "name already taken"));
        }

        let link = RemoteLink {
            id: LinkId::from(new_id().as_str()),
            parent_id: Some(request.parent_id),
            kind: LinkKind::Folder,
            state: LinkState::Active,
            name: request.name,
            name_hash: request.name_hash,
            mime_type: String::new(),
            size: 0,
            create_time: now_unix(),
            modify_time: now_unix(),
            signature_email: request.signature_address.clone(),
            name_signature_email: request.signature_address,
            node_key: request.node_key,
            node_passphrase: request.node_passphrase,
            node_passphrase_signature: request.node_passphrase_signature,
            x_attrs: None,
            file: None,
            folder: Some(RemoteFolderProperties {
                node_hash_key: request.node_hash_key,
            }),
        };

        let id = link.id.clone();
        state.links.insert(id.clone(), link.clone());
        state.emit(LinkEventType::Create, link);

        Ok(CreateFolderResponse { id })
    }

    async fn create_revision(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
    ) -> Result<CreateRevisionResponse, ClientError> {
        let mut state = self.lock();
        state.check_share(share_id)?;

        if !state.links.contains_key(link_id) {
            return Err(ClientError::status(404, "unknown link"));
        }

        let revision_id = RevisionId::from(new_id().as_str());
        state.revisions.insert(
            revision_id.clone(),
            RevisionRecord {
                link_id: link_id.clone(),
                committed: false,
                blocks: Vec::new(),
            },
        );

        Ok(CreateRevisionResponse { id: revision_id })
    }

    async fn commit_revision(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
        revision_id: &RevisionId,
        request: CommitRevisionRequest,
    ) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.check_share(share_id)?;

        // Collect the uploaded blocks for this revision, in order
        let mut blocks: Vec<RemoteBlock> = state
            .blocks
            .iter()
            .filter(|(_, record)| {
                &record.revision_id == revision_id && record.data.is_some()
            })
            .map(|(url, record)| RemoteBlock {
                index: record.index,
                url: url.clone(),
                token: record.token.clone(),
                hash: record.hash.clone(),
                enc_signature: record.enc_signature.clone(),
                signature_email: request.signature_address.clone(),
            })
            .collect();
        blocks.sort_by_key(|block| block.index);

        let revision = state
            .revisions
            .get_mut(revision_id)
            .ok_or_else(|| ClientError::status(404, "unknown revision"))?;
        if &revision.link_id != link_id {
            return Err(ClientError::status(409, "revision belongs to another link"));
        }
        revision.committed = true;
        revision.blocks = blocks;

        let link = state
            .links
            .get_mut(link_id)
            .ok_or_else(|| ClientError::status(404, "unknown link"))?;
        link.x_attrs = Some(request.x_attrs);
        link.modify_time = now_unix();
        if let Some(file) = link.file.as_mut() {
            file.active_revision_id = revision_id.clone();
        }

        let link = link.clone();
        state.emit(LinkEventType::Update, link);
        Ok(())
    }

    async fn move_link(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
        request: MoveLinkRequest,
    ) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.check_share(share_id)?;

        if !state.links.contains_key(&request.parent_id) {
            return Err(ClientError::status(404, "unknown parent"));
        }

        let link = state
            .links
            .get_mut(link_id)
            .ok_or_else(|| ClientError::status(404, "unknown link"))?;
        if link.name_hash != request.original_name_hash {
            return Err(ClientError::status(409, "stale original name hash"));
        }

        link.parent_id = Some(request.parent_id);
        link.name = request.name;
        link.name_hash = request.name_hash;
        link.node_passphrase = request.node_passphrase;
        link.node_passphrase_signature = request.node_passphrase_signature;
        link.modify_time = now_unix();

        let link = link.clone();
        state.emit(LinkEventType::Update, link);
        Ok(())
    }

    async fn trash_children(
        &self,
        share_id: &ShareId,
        parent_id: &LinkId,
        link_ids: &[LinkId],
    ) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.check_share(share_id)?;

        for link_id in link_ids {
            let link = state
                .links
                .get_mut(link_id)
                .ok_or_else(|| ClientError::status(404, "unknown link"))?;
            if link.parent_id.as_ref() != Some(parent_id) {
                return Err(ClientError::status(409, "link is not a child of parent"));
            }
            link.state = LinkState::Trashed;
            let link = link.clone();
            state.emit(LinkEventType::Update, link);
        }
        Ok(())
    }

    async fn delete_children(
        &self,
        share_id: &ShareId,
        parent_id: &LinkId,
        link_ids: &[LinkId],
    ) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.check_share(share_id)?;

        for link_id in link_ids {
            let Some(mut link) = state.links.remove(link_id) else {
                continue;
            };
            if link.parent_id.as_ref() != Some(parent_id) {
                state.links.insert(link_id.clone(), link);
                return Err(ClientError::status(409, "link is not a child of parent"));
            }
            link.state = LinkState::Deleted;
            state.emit(LinkEventType::Update, link);
        }
        Ok(())
    }

    async fn delete_revision(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
        revision_id: &RevisionId,
    ) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.check_share(share_id)?;

        match state.revisions.get(revision_id) {
            Some(revision) if &revision.link_id == link_id && !revision.committed => {
                state.revisions.remove(revision_id);
                Ok(())
            }
            Some(_) => Err(ClientError::status(409, "revision is not a draft")),
            None => Err(ClientError::status(404, "unknown revision")),
        }
    }

    async fn request_block_upload(
        &self,
        request: BlockUploadRequest,
    ) -> Result<Vec<BlockUploadLink>, ClientError> {
        let mut state = self.lock();
        state.check_share(&request.share_id)?;

        match state.revisions.get(&request.revision_id) {
            Some(revision) if revision.link_id == request.link_id => {}
            _ => return Err(ClientError::status(404, "unknown revision")),
        }

        let mut upload_links = Vec::new();
        for info in request.blocks {
            let url = format!("mem://block/{}", new_id());
            let token = new_id();
            state.blocks.insert(
                url.clone(),
                BlockRecord {
                    token: token.clone(),
                    link_id: request.link_id.clone(),
                    revision_id: request.revision_id.clone(),
                    index: info.index,
                    hash: info.hash,
                    enc_signature: info.enc_signature,
                    data: None,
                },
            );
            upload_links.push(BlockUploadLink { url, token });
        }

        Ok(upload_links)
    }

    async fn upload_block(
        &self,
        url: &str,
        token: &str,
        data: Bytes,
    ) -> Result<(), ClientError> {
        let mut state = self.lock();
        if state.fail_next_block_upload {
            state.fail_next_block_upload = false;
            return Err(ClientError::status(500, "injected upload failure"));
        }
        let record = state
            .blocks
            .get_mut(url)
            .ok_or_else(|| ClientError::status(404, "unknown upload url"))?;
        if record.token != token {
            return Err(ClientError::status(401, "bad upload token"));
        }
        record.data = Some(data);
        Ok(())
    }

    async fn get_revision(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
        revision_id: &RevisionId,
    ) -> Result<RemoteRevision, ClientError> {
        let state = self.lock();
        state.check_share(share_id)?;

        let revision = state
            .revisions
            .get(revision_id)
            .ok_or_else(|| ClientError::status(404, "unknown revision"))?;
        if &revision.link_id != link_id || !revision.committed {
            return Err(ClientError::status(404, "unknown revision"));
        }

        Ok(RemoteRevision {
            id: revision_id.clone(),
            blocks: revision.blocks.clone(),
        })
    }

    async fn get_block(&self, url: &str, token: &str) -> Result<Bytes, ClientError> {
        let state = self.lock();
        let record = state
            .blocks
            .get(url)
            .ok_or_else(|| ClientError::status(404, "unknown block"))?;
        if record.token != token {
            return Err(ClientError::status(401, "bad block token"));
        }
        record
            .data
            .clone()
            .ok_or_else(|| ClientError::status(404, "block not uploaded"))
    }
}
