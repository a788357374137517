//! Administrative ledger operations: users and the asset catalogue.

use log::info;
use std::sync::Arc;

use super::asset::{Asset, AssetId, NewAsset};
use super::auth::{AuthContext, Role, User, UserId};
use super::error::{Entity, StocksimError};
use crate::ports::ledger_port::LedgerPort;

#[derive(Clone)]
pub struct AdminService {
    ledger: Arc<dyn LedgerPort>,
}

impl AdminService {
    pub fn new(ledger: Arc<dyn LedgerPort>) -> Self {
        AdminService { ledger }
    }

    /// Create a user. An empty ledger accepts its first administrator from
    /// any caller.
    pub fn register_user(
        &self,
        auth: &AuthContext,
        username: &str,
        role: Role,
    ) -> Result<User, StocksimError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(StocksimError::validation("username must not be empty"));
        }

        let mut uow = self.ledger.begin()?;
        let bootstrap = uow.users()?.is_empty() && role == Role::Admin;
        if !bootstrap {
            auth.require_admin()?;
        }
        if uow.user_by_name(username)?.is_some() {
            return Err(StocksimError::validation(format!(
                "username '{username}' is taken"
            )));
        }
        let user = uow.insert_user(username, role)?;
        uow.commit()?;
        info!("registered {} '{}' as user {}", role, username, user.id);
        Ok(user)
    }

    pub fn user_by_name(&self, username: &str) -> Result<User, StocksimError> {
        let mut uow = self.ledger.begin()?;
        uow.user_by_name(username)?
            .ok_or_else(|| StocksimError::not_found(Entity::User, username))
    }

    pub fn set_user_suspended(
        &self,
        auth: &AuthContext,
        user_id: UserId,
        suspended: bool,
    ) -> Result<User, StocksimError> {
        auth.require_admin()?;
        let mut uow = self.ledger.begin()?;
        let mut user = uow
            .user(user_id)?
            .ok_or_else(|| StocksimError::not_found(Entity::User, user_id))?;
        uow.set_user_suspended(user_id, suspended)?;
        uow.commit()?;
        user.suspended = suspended;
        info!(
            "user {} {}",
            user.username,
            if suspended { "suspended" } else { "reinstated" }
        );
        Ok(user)
    }

    /// Removes the user with their portfolios, positions, transactions and alerts.
    pub fn delete_user(&self, auth: &AuthContext, user_id: UserId) -> Result<(), StocksimError> {
        auth.require_admin()?;
        if auth.user_id == Some(user_id) {
            return Err(StocksimError::validation("administrators cannot delete themselves"));
        }
        let mut uow = self.ledger.begin()?;
        let user = uow
            .user(user_id)?
            .ok_or_else(|| StocksimError::not_found(Entity::User, user_id))?;
        uow.delete_user(user_id)?;
        uow.commit()?;
        info!("deleted user {} '{}'", user_id, user.username);
        Ok(())
    }

    pub fn add_asset(&self, auth: &AuthContext, new: &NewAsset) -> Result<Asset, StocksimError> {
        auth.require_admin()?;
        new.validate()?;
        let mut uow = self.ledger.begin()?;
        if uow.asset_by_symbol(&new.symbol)?.is_some() {
            return Err(StocksimError::validation(format!(
                "asset '{}' already exists",
                new.symbol
            )));
        }
        let asset = uow.insert_asset(new)?;
        uow.commit()?;
        info!("added asset {} '{}'", asset.id, asset.symbol);
        Ok(asset)
    }

    pub fn users(&self, auth: &AuthContext) -> Result<Vec<User>, StocksimError> {
        auth.require_admin()?;
        let mut uow = self.ledger.begin()?;
        uow.users()
    }

    pub fn asset_by_symbol(&self, symbol: &str) -> Result<Asset, StocksimError> {
        let mut uow = self.ledger.begin()?;
        uow.asset_by_symbol(symbol)?
            .ok_or_else(|| StocksimError::not_found(Entity::Asset, symbol))
    }

    pub fn assets(&self) -> Result<Vec<Asset>, StocksimError> {
        let mut uow = self.ledger.begin()?;
        uow.assets()
    }

    /// Refused while any transaction or position references the asset.
    pub fn delete_asset(&self, auth: &AuthContext, asset_id: AssetId) -> Result<(), StocksimError> {
        auth.require_admin()?;
        let mut uow = self.ledger.begin()?;
        let asset = uow
            .asset(asset_id)?
            .ok_or_else(|| StocksimError::not_found(Entity::Asset, asset_id))?;

        let referenced = uow.count_transactions_for_asset(asset_id)?;
        if referenced > 0 {
            return Err(StocksimError::validation(format!(
                "asset '{}' is referenced by {} transactions",
                asset.symbol, referenced
            )));
        }
        if !uow.holders_of(asset_id)?.is_empty() {
            return Err(StocksimError::validation(format!(
                "asset '{}' is still held",
                asset.symbol
            )));
        }

        uow.delete_asset(asset_id)?;
        uow.commit()?;
        info!("deleted asset {} '{}'", asset_id, asset.symbol);
        Ok(())
    }
}
