//! Device trust: a time-limited exemption from the second factor.
//!
//! A trust record lives in two places that are written together on grant and
//! cleared together on revoke:
//!
//! - the `device_trust` cookie, which the gate reads on every request;
//! - durable client storage (`device_trust_token`, `device_trust_timestamp`),
//!   which drives the "trusted until" display.
//!
//! The two are not atomic, so authority is split on purpose. For access
//! decisions the cookie decides: no valid cookie means untrusted, whatever the
//! durable store holds, and a valid cookie alone is enough when the durable
//! store is empty. For display the durable timestamp decides. An expired
//! durable timestamp revokes both locations.

pub mod clock;
pub mod cookies;
pub mod storage;
pub mod token;

use chrono::{DateTime, TimeDelta, Utc};
use std::{fmt, sync::Arc};
use tracing::{debug, warn};

pub use self::{
    clock::{Clock, FixedClock, SystemClock},
    cookies::{CookieJar, MemoryCookieJar, RequestCookies, SetCookie},
    storage::{ClientStorage, DurableStore, MemoryStore, StorageError},
    token::{TokenError, TrustKey},
};

pub const TRUST_COOKIE_NAME: &str = "device_trust";
pub const TOKEN_KEY: &str = "device_trust_token";
pub const TIMESTAMP_KEY: &str = "device_trust_timestamp";
pub const TRUST_DURATION_DAYS: i64 = 30;

#[must_use]
pub fn trust_duration() -> TimeDelta {
    TimeDelta::days(TRUST_DURATION_DAYS)
}

/// A freshly granted trust record.
#[derive(Clone, PartialEq, Eq)]
pub struct TrustRecord {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for TrustRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustRecord")
            .field("token", &"***")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

enum DurableTimestamp {
    Missing,
    Valid(DateTime<Utc>),
    Expired,
}

pub struct DeviceTrustStore<D, C, K = SystemClock> {
    durable: D,
    cookies: C,
    key: Arc<TrustKey>,
    subject: String,
    clock: K,
}

impl<D, C> DeviceTrustStore<D, C, SystemClock>
where
    D: DurableStore,
    C: CookieJar,
{
    #[must_use]
    pub fn new(durable: D, cookies: C, key: Arc<TrustKey>, subject: impl Into<String>) -> Self {
        Self {
            durable,
            cookies,
            key,
            subject: subject.into(),
            clock: SystemClock,
        }
    }
}

impl<D, C, K> DeviceTrustStore<D, C, K>
where
    D: DurableStore,
    C: CookieJar,
    K: Clock,
{
    #[must_use]
    pub fn with_clock<K2: Clock>(self, clock: K2) -> DeviceTrustStore<D, C, K2> {
        DeviceTrustStore {
            durable: self.durable,
            cookies: self.cookies,
            key: self.key,
            subject: self.subject,
            clock,
        }
    }

    /// Whether this browser may skip the second factor right now.
    ///
    /// Expired or invalid records are revoked as a side effect.
    pub fn is_trusted(&mut self) -> bool {
        let now = self.clock.now();
        let Some(token) = self.cookies.get(TRUST_COOKIE_NAME).filter(|t| !t.is_empty()) else {
            return false;
        };

        if let Err(err) = self.key.verify(&token, &self.subject, now) {
            match err {
                TokenError::Expired => debug!("Device trust expired, revoking"),
                other => warn!("Rejecting device trust cookie: {other}"),
            }
            self.revoke();
            return false;
        }

        match self.durable_timestamp(now) {
            Ok(DurableTimestamp::Missing | DurableTimestamp::Valid(_)) => true,
            Ok(DurableTimestamp::Expired) => {
                debug!("Device trust timestamp expired, revoking");
                self.revoke();
                false
            }
            Err(err) => {
                warn!("Device trust storage unavailable: {err}");
                false
            }
        }
    }

    /// Trust this browser for the next 30 days.
    ///
    /// Returns `None` when the record could not be written; partial writes are
    /// rolled back best-effort.
    pub fn grant(&mut self) -> Option<TrustRecord> {
        let issued_at = self.clock.now();
        let expires_at = issued_at + trust_duration();

        let token = match self.key.issue(&self.subject, issued_at) {
            Ok(token) => token,
            Err(err) => {
                warn!("Failed to issue device trust token: {err}");
                return None;
            }
        };

        let written = self
            .durable
            .set(TOKEN_KEY, &token)
            .and_then(|()| {
                self.durable
                    .set(TIMESTAMP_KEY, &issued_at.timestamp_millis().to_string())
            })
            .and_then(|()| {
                self.cookies
                    .set(SetCookie::strict(TRUST_COOKIE_NAME, &token, expires_at))
            });

        if let Err(err) = written {
            warn!("Failed to persist device trust: {err}");
            self.revoke();
            return None;
        }

        debug!("Device trust granted until {expires_at}");
        Some(TrustRecord {
            token,
            issued_at,
            expires_at,
        })
    }

    /// Clear both locations. Safe to call when nothing is stored.
    pub fn revoke(&mut self) {
        for key in [TOKEN_KEY, TIMESTAMP_KEY] {
            if let Err(err) = self.durable.remove(key) {
                warn!("Failed to clear {key}: {err}");
            }
        }
        if let Err(err) = self.cookies.set(SetCookie::expired(TRUST_COOKIE_NAME)) {
            warn!("Failed to expire device trust cookie: {err}");
        }
    }

    /// When the current trust ends, for display. Never mutates state.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let token = self.cookies.get(TRUST_COOKIE_NAME)?;
        let claims = self.key.verify(&token, &self.subject, now).ok()?;
        match self.durable_timestamp(now) {
            Ok(DurableTimestamp::Valid(issued_at)) => Some(issued_at + trust_duration()),
            Ok(DurableTimestamp::Missing) => Some(claims.issued_at + trust_duration()),
            Ok(DurableTimestamp::Expired) | Err(_) => None,
        }
    }

    #[must_use]
    pub fn into_parts(self) -> (D, C) {
        (self.durable, self.cookies)
    }

    fn durable_timestamp(&self, now: DateTime<Utc>) -> Result<DurableTimestamp, StorageError> {
        let Some(raw) = self.durable.get(TIMESTAMP_KEY)? else {
            return Ok(DurableTimestamp::Missing);
        };
        // Unreadable timestamps are treated as expired so they get cleaned up.
        let Some(issued_at) = raw
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
        else {
            return Ok(DurableTimestamp::Expired);
        };
        if now - issued_at > trust_duration() {
            Ok(DurableTimestamp::Expired)
        } else {
            Ok(DurableTimestamp::Valid(issued_at))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    const SUBJECT: &str = "4f8c2a9e-user";

    fn key() -> Arc<TrustKey> {
        match TrustKey::new(&SecretString::from(
            "a-test-secret-that-is-long-enough!!".to_string(),
        )) {
            Ok(key) => Arc::new(key),
            Err(err) => panic!("test key: {err}"),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000, 0).unwrap_or_default()
    }

    fn store_at(
        at: DateTime<Utc>,
    ) -> DeviceTrustStore<MemoryStore, MemoryCookieJar, FixedClock> {
        DeviceTrustStore::new(MemoryStore::new(), MemoryCookieJar::new(), key(), SUBJECT)
            .with_clock(FixedClock(at))
    }

    /// Move the stored record to a new clock, keeping storage and cookies.
    fn advance(
        store: DeviceTrustStore<MemoryStore, MemoryCookieJar, FixedClock>,
        at: DateTime<Utc>,
    ) -> DeviceTrustStore<MemoryStore, MemoryCookieJar, FixedClock> {
        store.with_clock(FixedClock(at))
    }

    #[test]
    fn untrusted_by_default() {
        let mut store = store_at(now());
        assert!(!store.is_trusted());
        assert_eq!(store.expires_at(), None);
    }

    #[test]
    fn grant_then_trusted_with_thirty_day_expiry() {
        let mut store = store_at(now());
        let record = store.grant();
        assert!(record.is_some());
        assert!(store.is_trusted());
        assert_eq!(store.expires_at(), Some(now() + TimeDelta::days(30)));

        let (durable, cookies) = store.into_parts();
        assert_eq!(
            durable.get(TIMESTAMP_KEY).ok().flatten(),
            Some(now().timestamp_millis().to_string())
        );
        assert!(durable.get(TOKEN_KEY).ok().flatten().is_some());
        let Some(cookie) = cookies.written().last() else {
            panic!("cookie written");
        };
        assert_eq!(cookie.name, TRUST_COOKIE_NAME);
        assert_eq!(cookie.expires, Some(now() + TimeDelta::days(30)));
        assert!(cookie.secure);
        assert_eq!(cookie.same_site, cookies::SameSite::Strict);
    }

    #[test]
    fn revoke_is_idempotent() {
        let mut store = store_at(now());
        let _ = store.grant();
        store.revoke();
        assert!(!store.is_trusted());
        store.revoke();
        assert!(!store.is_trusted());
        assert_eq!(store.expires_at(), None);
    }

    #[test]
    fn expired_record_is_revoked_on_read() {
        let issued = now() - TimeDelta::days(30) - TimeDelta::seconds(1);
        let mut store = store_at(issued);
        let _ = store.grant();

        let mut store = advance(store, now());
        assert!(!store.is_trusted());
        assert_eq!(store.expires_at(), None);

        let (durable, cookies) = store.into_parts();
        assert_eq!(durable.get(TOKEN_KEY).ok().flatten(), None);
        assert_eq!(durable.get(TIMESTAMP_KEY).ok().flatten(), None);
        assert_eq!(cookies.get(TRUST_COOKIE_NAME), None);
    }

    #[test]
    fn exactly_thirty_days_is_still_trusted() {
        let mut store = store_at(now() - TimeDelta::days(30));
        let _ = store.grant();
        let mut store = advance(store, now());
        assert!(store.is_trusted());
    }

    #[test]
    fn expired_durable_timestamp_revokes_valid_cookie() {
        let mut store = store_at(now());
        let _ = store.grant();
        let (mut durable, cookies) = store.into_parts();
        let stale = (now() - TimeDelta::days(31)).timestamp_millis().to_string();
        assert!(durable.set(TIMESTAMP_KEY, &stale).is_ok());

        let mut store =
            DeviceTrustStore::new(durable, cookies, key(), SUBJECT).with_clock(FixedClock(now()));
        assert!(!store.is_trusted());
        let (_, cookies) = store.into_parts();
        assert_eq!(cookies.get(TRUST_COOKIE_NAME), None);
    }

    #[test]
    fn cookie_alone_is_sufficient() {
        let mut store = store_at(now());
        let _ = store.grant();
        let (_, cookies) = store.into_parts();

        let mut store = DeviceTrustStore::new(MemoryStore::new(), cookies, key(), SUBJECT)
            .with_clock(FixedClock(now() + TimeDelta::days(1)));
        assert!(store.is_trusted());
        // Display falls back to the token's own grant time.
        assert_eq!(store.expires_at(), Some(now() + TimeDelta::days(30)));
    }

    #[test]
    fn durable_record_without_cookie_is_untrusted() {
        let mut store = store_at(now());
        let _ = store.grant();
        let (durable, _) = store.into_parts();

        let mut store = DeviceTrustStore::new(durable, MemoryCookieJar::new(), key(), SUBJECT)
            .with_clock(FixedClock(now()));
        assert!(!store.is_trusted());
        assert_eq!(store.expires_at(), None);
    }

    #[test]
    fn cookie_for_another_account_is_untrusted() {
        let mut store = store_at(now());
        let _ = store.grant();
        let (durable, cookies) = store.into_parts();

        let mut store = DeviceTrustStore::new(durable, cookies, key(), "someone-else")
            .with_clock(FixedClock(now()));
        assert!(!store.is_trusted());
    }

    #[test]
    fn forged_cookie_is_untrusted_and_cleared() {
        let mut jar = MemoryCookieJar::new();
        jar.insert(TRUST_COOKIE_NAME, "v1.bm9uY2U.1760000000000.Zm9yZ2Vk");
        let mut store =
            DeviceTrustStore::new(MemoryStore::new(), jar, key(), SUBJECT).with_clock(FixedClock(now()));
        assert!(!store.is_trusted());
        let (_, cookies) = store.into_parts();
        assert_eq!(cookies.get(TRUST_COOKIE_NAME), None);
    }

    #[test]
    fn unavailable_storage_degrades_to_untrusted() {
        let mut store =
            DeviceTrustStore::new(MemoryStore::unavailable(), MemoryCookieJar::new(), key(), SUBJECT)
                .with_clock(FixedClock(now()));
        assert!(store.grant().is_none());
        assert!(!store.is_trusted());
        store.revoke();
        assert_eq!(store.expires_at(), None);
    }

    #[test]
    fn failed_grant_does_not_leave_a_cookie() {
        let mut jar = MemoryCookieJar::new();
        let token = key().issue(SUBJECT, now()).unwrap_or_default();
        jar.insert(TRUST_COOKIE_NAME, &token);
        let mut store =
            DeviceTrustStore::new(MemoryStore::unavailable(), jar, key(), SUBJECT)
                .with_clock(FixedClock(now()));
        assert!(store.grant().is_none());
        let (_, cookies) = store.into_parts();
        assert_eq!(cookies.get(TRUST_COOKIE_NAME), None);
    }

    #[test]
    fn client_storage_records_grant_and_revoke() {
        let mut store = DeviceTrustStore::new(
            ClientStorage::default(),
            MemoryCookieJar::new(),
            key(),
            SUBJECT,
        )
        .with_clock(FixedClock(now()));
        let _ = store.grant();
        store.revoke();
        let (durable, _) = store.into_parts();
        let changes = durable.into_changes();
        assert_eq!(changes.get(TOKEN_KEY), Some(&None));
        assert_eq!(changes.get(TIMESTAMP_KEY), Some(&None));
    }

    #[test]
    fn record_debug_hides_token() {
        let mut store = store_at(now());
        let Some(record) = store.grant() else {
            panic!("grant");
        };
        assert!(!format!("{record:?}").contains(&record.token));
    }
}
