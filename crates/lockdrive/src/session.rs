//! Session wiring
//!
//! A [`Session`] assembles the core in dependency order: identity, then
//! the link tree, then the event loop, then the filesystem facade.
//! Dropping the session's handles (or calling [`Session::close`]) stops
//! the event loop; the in-memory tree goes with it.

use std::sync::Arc;

use crate::api::ClientError;
use crate::application::Application;
use crate::config::DriveConfig;
use crate::error::DriveResult;
use crate::events::Events;
use crate::filesystem::FileSystem;
use crate::links::Links;
use crate::user::User;

pub struct Session {
    user: Arc<User>,
    links: Links,
    events: Events,
    fs: FileSystem,
}

impl Session {
    /// Build a session over a logged-in application.
    pub async fn open(application: &Application, config: DriveConfig) -> DriveResult<Self> {
        let client = application
            .client()
            .ok_or(ClientError::Unauthenticated)?;
        let tokens = application
            .tokens()
            .ok_or(ClientError::Unauthenticated)?;

        let user = Arc::new(User::fetch(&client, &tokens.salted_key_pass).await?);

        let links = Links::new(client.clone(), user.clone(), &config);
        links.init().await?;

        let events = Events::start(client.clone(), links.clone(), &config).await?;

        let fs = FileSystem::new(client, user.clone(), links.clone(), events.clone());

        Ok(Self {
            user,
            links,
            events,
            fs,
        })
    }

    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    pub fn filesystem(&self) -> &FileSystem {
        &self.fs
    }

    /// Stop the event loop.
    pub fn close(&self) {
        self.events.shutdown();
    }
}
