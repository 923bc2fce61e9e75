//! User listing command.

use std::path::Path;
use tokio::runtime::Runtime;

use crate::db::{self, Store};
use crate::error::Result;
use crate::model::User;

/// Print every user in the store.
pub fn cmd_list_users(rt: &Runtime, db_path: &Path) -> anyhow::Result<()> {
    let users = rt.block_on(load_users(db_path))?;

    if users.is_empty() {
        println!("No users found in {}", db_path.display());
        return Ok(());
    }

    println!("{:<38} {:<20} Username", "ID", "Name");
    for user in &users {
        println!("{:<38} {:<20} {}", user.id, user.name, user.user_name);
    }
    Ok(())
}

async fn load_users(db_path: &Path) -> Result<Vec<User>> {
    let store = Store::open(db_path).await?;
    let result = match store.pool().acquire().await {
        Ok(mut conn) => db::list_users(&mut conn).await.map_err(Into::into),
        Err(e) => Err(e.into()),
    };
    store.close().await;
    result
}
