//! Published session snapshot and its derived read-only view.
//!
//! Identity fields are private. The only ways to change them are
//! [`Session::set_principal`] and [`Session::clear_identity`], which keep
//! three invariants in a single mutation:
//!
//! - `account_id` is always `AccountId::from_principal(principal)`
//! - `user` is never present without a `principal`
//! - a profile loaded for one principal never survives a switch to another

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::principal::Principal;
use crate::profile::UserProfile;
use crate::provider::{ProviderState, ProviderType};

/// Current authentication and connection state of the application.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub provider_state: ProviderState,
    /// Kind of the attached provider, if any.
    pub provider_type: Option<ProviderType>,
    principal: Option<Principal>,
    account_id: Option<AccountId>,
    user: Option<UserProfile>,
}

impl Session {
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn account_id(&self) -> Option<&AccountId> {
        self.account_id.as_ref()
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    /// Set (or clear) the principal, re-deriving the account id.
    ///
    /// A profile is kept only when the principal is unchanged.
    pub fn set_principal(&mut self, principal: Option<Principal>) {
        if self.principal != principal {
            self.user = None;
        }
        self.account_id = principal.as_ref().map(AccountId::from_principal);
        self.principal = principal;
    }

    /// Replace the profile. Ignored (returns false) without a principal.
    pub fn set_user(&mut self, user: Option<UserProfile>) -> bool {
        if user.is_some() && self.principal.is_none() {
            return false;
        }
        self.user = user;
        true
    }

    /// Drop principal, account id and profile together.
    pub fn clear_identity(&mut self) {
        self.principal = None;
        self.account_id = None;
        self.user = None;
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            is_authenticated: self.principal.is_some(),
            is_logged: self.user.is_some(),
            user: self.user.clone(),
            principal: self.principal.clone(),
            account_id: self.account_id,
        }
    }
}

/// What UI collaborators read: pure projections of a [`Session`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub is_authenticated: bool,
    pub is_logged: bool,
    pub user: Option<UserProfile>,
    pub principal: Option<Principal>,
    pub account_id: Option<AccountId>,
}
