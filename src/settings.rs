use log::{error, info};
use serde_json::json;

use crate::auth::AuthProvider;
use crate::error::{Alert, Result};
use crate::models::USERS;
use crate::storage::Preferences;
use crate::store::{BlobStore, DocumentStore};

const THEME_KEY: &str = "theme";
const PROFILE_IMAGE_KEY: &str = "profileImageUri";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(value: &str) -> Option<Theme> {
        match value {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }

    pub fn toggled(self) -> Theme {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// User preferences, loaded once and written back on every change.
pub struct Settings {
    prefs: Preferences,
    theme: Theme,
    profile_image_uri: Option<String>,
}

impl Settings {
    pub fn load(prefs: Preferences) -> Result<Self> {
        let theme = prefs
            .get(THEME_KEY)?
            .and_then(|value| Theme::parse(&value))
            .unwrap_or_default();
        let profile_image_uri = prefs.get(PROFILE_IMAGE_KEY)?;
        Ok(Settings {
            prefs,
            theme,
            profile_image_uri,
        })
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn profile_image_uri(&self) -> Option<&str> {
        self.profile_image_uri.as_deref()
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<()> {
        self.prefs.set(THEME_KEY, theme.as_str())?;
        self.theme = theme;
        Ok(())
    }

    pub fn toggle_theme(&mut self) -> Result<Theme> {
        let theme = self.theme.toggled();
        self.set_theme(theme)?;
        Ok(theme)
    }

    pub fn set_profile_image_uri(&mut self, uri: Option<String>) -> Result<()> {
        match &uri {
            Some(uri) => self.prefs.set(PROFILE_IMAGE_KEY, uri)?,
            None => self.prefs.remove(PROFILE_IMAGE_KEY)?,
        }
        self.profile_image_uri = uri;
        Ok(())
    }
}

pub fn profile_picture_path(uid: &str, now_ms: i64) -> String {
    format!("profile_pictures/{}_{}", uid, now_ms)
}

/// Uploads a new profile picture, points the user's profile at it and
/// caches its URL locally.
pub async fn upload_profile_picture<S, B, A>(
    store: &S,
    blobs: &B,
    auth: &A,
    settings: &mut Settings,
    bytes: Vec<u8>,
    now_ms: i64,
) -> Alert
where
    S: DocumentStore,
    B: BlobStore,
    A: AuthProvider + ?Sized,
{
    let Some(session) = auth.current_session() else {
        return Alert::error("Please sign in to update your profile picture.");
    };
    let path = profile_picture_path(&session.uid, now_ms);

    let result = async {
        let url = blobs.upload(&path, bytes).await?;
        store
            .update(USERS, &session.uid, json!({ "profilePicture": url }))
            .await?;
        settings.set_profile_image_uri(Some(url.clone()))?;
        Ok::<_, crate::error::Error>(url)
    }
    .await;

    match result {
        Ok(url) => {
            info!("Profile picture updated: {}", url);
            Alert::success("Profile image updated")
        }
        Err(e) => {
            error!("Error uploading profile picture: {}", e);
            Alert::error("Failed to upload image")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{LocalAuth, Session};
    use crate::models::UserProfile;
    use crate::storage::{LocalBlobStore, SqliteStore};

    fn settings() -> Settings {
        Settings::load(Preferences::new(":memory:").unwrap()).unwrap()
    }

    #[test]
    fn test_defaults_to_light_theme() {
        let settings = settings();
        assert_eq!(settings.theme(), Theme::Light);
        assert!(settings.profile_image_uri().is_none());
    }

    #[test]
    fn test_changes_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.db");
        let path = path.to_str().unwrap();

        let mut settings = Settings::load(Preferences::new(path).unwrap()).unwrap();
        assert_eq!(settings.toggle_theme().unwrap(), Theme::Dark);
        settings
            .set_profile_image_uri(Some("file:///tmp/me.jpg".to_string()))
            .unwrap();
        drop(settings);

        let mut reloaded = Settings::load(Preferences::new(path).unwrap()).unwrap();
        assert_eq!(reloaded.theme(), Theme::Dark);
        assert_eq!(reloaded.profile_image_uri(), Some("file:///tmp/me.jpg"));

        reloaded.set_profile_image_uri(None).unwrap();
        let reloaded = Settings::load(Preferences::new(path).unwrap()).unwrap();
        assert!(reloaded.profile_image_uri().is_none());
    }

    #[test]
    fn test_unknown_theme_value_falls_back() {
        let prefs = Preferences::new(":memory:").unwrap();
        prefs.set("theme", "sepia").unwrap();
        assert_eq!(Settings::load(prefs).unwrap().theme(), Theme::Light);
    }

    #[tokio::test]
    async fn test_upload_updates_profile_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path());
        let store = SqliteStore::new(":memory:").unwrap();
        store
            .set(USERS, "u1", json!({"fullName": "Ali Raza"}))
            .await
            .unwrap();
        let auth = LocalAuth::new(Some(Session::new("u1")));
        let mut settings = settings();

        let alert = upload_profile_picture(
            &store,
            &blobs,
            &auth,
            &mut settings,
            vec![0xff, 0xd8, 0xff],
            1_700_000_000_000,
        )
        .await;
        assert!(alert.is_success());
        assert_eq!(alert.message, "Profile image updated");

        let profile: UserProfile = store.get_doc(USERS, "u1").await.unwrap().unwrap().decode().unwrap();
        let url = profile.profile_picture.unwrap();
        assert!(url.ends_with("profile_pictures/u1_1700000000000"));
        assert_eq!(settings.profile_image_uri(), Some(url.as_str()));
        assert_eq!(profile.full_name, "Ali Raza");
    }

    #[tokio::test]
    async fn test_upload_fails_without_profile_document() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path());
        let store = SqliteStore::new(":memory:").unwrap();
        let auth = LocalAuth::new(Some(Session::new("u1")));
        let mut settings = settings();

        let alert = upload_profile_picture(&store, &blobs, &auth, &mut settings, vec![1], 5).await;
        assert_eq!(alert.message, "Failed to upload image");
        assert!(settings.profile_image_uri().is_none());
    }
}
