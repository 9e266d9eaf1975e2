//! DefaultAccount - login identity stored as an `account` node
//!
//! All account state lives in the attribute bag; this type only adds
//! defaults and typed accessors plus the lock / suspend / login rules.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::Result;
use crate::node::Attributes;
use crate::object::DefaultObject;
use crate::registry::{ClassInfo, Entity, NodeClass};
use crate::writer::SyncWriter;

/// Reason recorded when too many failed logins lock an account
pub const FAILED_LOGIN_LOCK_REASON: &str = "too many failed login attempts";

#[derive(Clone, Debug)]
pub struct DefaultAccount(DefaultObject);

impl DefaultAccount {
    /// Create an account named after `username` and schedule its first write
    pub fn new(username: &str, email: &str, attributes: Attributes, writer: &SyncWriter) -> Result<Self> {
        Self::create(username, identity(username, email, attributes), writer)
    }

    /// Create an account that is only persisted by explicit syncs
    pub fn new_detached(username: &str, email: &str, attributes: Attributes) -> Result<Self> {
        Self::create_detached(username, identity(username, email, attributes))
    }

    fn text(&self, key: &str) -> Option<String> {
        self.0
            .get_attribute(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    fn flag(&self, key: &str) -> bool {
        self.0
            .get_attribute(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn count(&self, key: &str) -> i64 {
        self.0
            .get_attribute(key)
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }

    fn instant(&self, key: &str) -> Option<DateTime<Utc>> {
        self.text(key)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn set(&self, key: &str, value: Value) {
        self.0.put_attribute(key, value);
    }

    fn apply(&self, changes: Value) {
        if let Value::Object(map) = changes {
            self.0.merge_attributes(map);
        }
    }

    // ========== Typed accessors ==========

    /// Login name; falls back to the object name
    pub fn username(&self) -> String {
        self.text("username").unwrap_or_else(|| self.0.name())
    }

    pub fn set_username(&self, username: &str) {
        self.set("username", json!(username));
    }

    pub fn email(&self) -> String {
        self.text("email").unwrap_or_default()
    }

    pub fn set_email(&self, email: &str) {
        self.set("email", json!(email));
    }

    pub fn hashed_password(&self) -> String {
        self.text("hashed_password").unwrap_or_default()
    }

    pub fn set_hashed_password(&self, hash: &str) {
        self.set("hashed_password", json!(hash));
    }

    pub fn is_verified(&self) -> bool {
        self.flag("is_verified")
    }

    pub fn set_verified(&self, verified: bool) {
        self.set("is_verified", json!(verified));
    }

    pub fn is_locked(&self) -> bool {
        self.flag("is_locked")
    }

    pub fn is_suspended(&self) -> bool {
        self.flag("is_suspended")
    }

    pub fn login_count(&self) -> i64 {
        self.count("login_count")
    }

    pub fn failed_login_attempts(&self) -> i64 {
        self.count("failed_login_attempts")
    }

    pub fn max_failed_attempts(&self) -> i64 {
        self.count("max_failed_attempts")
    }

    pub fn set_max_failed_attempts(&self, max: i64) {
        self.set("max_failed_attempts", json!(max));
    }

    pub fn last_login(&self) -> Option<DateTime<Utc>> {
        self.instant("last_login")
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.instant("last_activity")
    }

    pub fn lock_reason(&self) -> Option<String> {
        self.text("lock_reason")
    }

    pub fn suspension_reason(&self) -> Option<String> {
        self.text("suspension_reason")
    }

    pub fn suspension_until(&self) -> Option<DateTime<Utc>> {
        self.instant("suspension_until")
    }

    pub fn created_by(&self) -> String {
        self.text("created_by").unwrap_or_default()
    }

    // ========== Login lifecycle ==========

    /// Record a successful login
    pub fn update_last_login(&self) {
        self.apply(json!({
            "last_login": Utc::now().to_rfc3339(),
            "login_count": self.login_count() + 1,
            "failed_login_attempts": 0,
        }));
    }

    pub fn update_last_activity(&self) {
        self.set("last_activity", json!(Utc::now().to_rfc3339()));
    }

    /// Count a failed login; locks the account once the maximum is reached
    pub fn record_failed_login(&self) {
        let attempts = self.failed_login_attempts() + 1;
        if attempts >= self.max_failed_attempts() {
            self.apply(json!({
                "failed_login_attempts": attempts,
                "is_locked": true,
                "lock_reason": FAILED_LOGIN_LOCK_REASON,
            }));
        } else {
            self.set("failed_login_attempts", json!(attempts));
        }
    }

    pub fn lock_account(&self, reason: Option<&str>) {
        self.apply(json!({ "is_locked": true, "lock_reason": reason }));
    }

    /// Unlock and reset the failure counter
    pub fn unlock_account(&self) {
        self.apply(json!({
            "is_locked": false,
            "lock_reason": null,
            "failed_login_attempts": 0,
        }));
    }

    /// Suspend the account; `until = None` suspends indefinitely
    pub fn suspend_account(&self, reason: &str, until: Option<DateTime<Utc>>) {
        self.apply(json!({
            "is_suspended": true,
            "suspension_reason": reason,
            "suspension_until": until.map(|t| t.to_rfc3339()),
        }));
    }

    pub fn unsuspend_account(&self) {
        self.apply(json!({
            "is_suspended": false,
            "suspension_reason": null,
            "suspension_until": null,
        }));
    }

    /// Whether a login is allowed right now. A suspension whose end has
    /// passed is lifted as a side effect.
    pub fn can_login(&self) -> bool {
        if self.is_locked() {
            return false;
        }
        if self.is_suspended() {
            match self.suspension_until() {
                Some(until) if until <= Utc::now() => self.unsuspend_account(),
                _ => return false,
            }
        }
        true
    }

    /// Account status as JSON
    pub fn status_summary(&self) -> Value {
        json!({
            "uuid": self.0.uuid().to_string(),
            "username": self.username(),
            "email": self.email(),
            "is_verified": self.is_verified(),
            "is_locked": self.is_locked(),
            "is_suspended": self.is_suspended(),
            "roles": self.0.roles(),
            "permissions": self.0.permissions(),
            "login_count": self.login_count(),
            "last_login": self.last_login().map(|t| t.to_rfc3339()),
            "last_activity": self.last_activity().map(|t| t.to_rfc3339()),
            "lock_reason": self.lock_reason(),
            "suspension_reason": self.suspension_reason(),
            "suspension_until": self.suspension_until().map(|t| t.to_rfc3339()),
        })
    }
}

fn identity(username: &str, email: &str, attributes: Attributes) -> Attributes {
    let mut merged = Attributes::new();
    merged.insert("username".to_string(), json!(username));
    merged.insert("email".to_string(), json!(email));
    merged.extend(attributes);
    merged
}

impl std::ops::Deref for DefaultAccount {
    type Target = DefaultObject;

    fn deref(&self) -> &DefaultObject {
        &self.0
    }
}

impl Entity for DefaultAccount {
    fn object(&self) -> &DefaultObject {
        &self.0
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send + Sync> {
        self
    }
}

impl NodeClass for DefaultAccount {
    const CLASS: ClassInfo = ClassInfo {
        type_code: "account",
        type_name: "Account",
        classname: "DefaultAccount",
        module_path: "campusgraph::account",
    };

    fn defaults() -> Attributes {
        let defaults = json!({
            "is_verified": false,
            "is_locked": false,
            "is_suspended": false,
            "login_count": 0,
            "failed_login_attempts": 0,
            "max_failed_attempts": 5,
            "roles": ["user"],
            "permissions": [],
            "hashed_password": "",
            "last_login": null,
            "last_activity": null,
            "lock_reason": null,
            "suspension_reason": null,
            "suspension_until": null,
            "created_by": "system",
        });
        match defaults {
            Value::Object(map) => map,
            _ => Attributes::new(),
        }
    }

    fn from_object(object: DefaultObject) -> Self {
        Self(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn alice() -> DefaultAccount {
        DefaultAccount::new_detached("alice", "alice@campus.edu", Attributes::new()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let account = alice();
        assert_eq!(account.name(), "alice");
        assert_eq!(account.username(), "alice");
        assert_eq!(account.email(), "alice@campus.edu");
        assert_eq!(account.max_failed_attempts(), 5);
        assert_eq!(account.roles(), vec!["user"]);
        assert_eq!(account.created_by(), "system");
        assert!(account.can_login());
    }

    #[test]
    fn test_failed_logins_lock() {
        let account = alice();
        account.set_max_failed_attempts(2);

        account.record_failed_login();
        assert!(!account.is_locked());
        account.record_failed_login();
        assert!(account.is_locked());
        assert_eq!(account.lock_reason().as_deref(), Some(FAILED_LOGIN_LOCK_REASON));
        assert!(!account.can_login());

        account.unlock_account();
        assert_eq!(account.failed_login_attempts(), 0);
        assert!(account.can_login());
    }

    #[test]
    fn test_login_resets_failures() {
        let account = alice();
        account.record_failed_login();
        account.update_last_login();

        assert_eq!(account.login_count(), 1);
        assert_eq!(account.failed_login_attempts(), 0);
        assert!(account.last_login().is_some());
    }

    #[test]
    fn test_suspension() {
        let account = alice();

        account.suspend_account("spam", None);
        assert!(!account.can_login());

        account.suspend_account("spam", Some(Utc::now() + Duration::hours(1)));
        assert!(!account.can_login());

        account.suspend_account("spam", Some(Utc::now() - Duration::hours(1)));
        assert!(account.can_login());
        assert!(!account.is_suspended());
        assert_eq!(account.suspension_reason(), None);
    }

    #[test]
    fn test_status_summary() {
        let account = alice();
        account.lock_account(Some("audit"));

        let summary = account.status_summary();
        assert_eq!(summary["username"], "alice");
        assert_eq!(summary["is_locked"], true);
        assert_eq!(summary["lock_reason"], "audit");
        assert!(summary["last_login"].is_null());
    }

    #[test]
    fn test_setters_are_single_mutations() {
        let account = alice();
        let v = account.version();

        account.set_email("alice@example.edu");
        assert_eq!(account.version(), v + 1);
        assert_eq!(account.email(), "alice@example.edu");

        account.unlock_account();
        assert_eq!(account.version(), v + 2);
        assert!(!account.is_locked());
        assert_eq!(account.lock_reason(), None);
    }
}
