//! Built-in packet handlers.
//!
//! | Identifier | Body                                          | Reply                      |
//! |------------|-----------------------------------------------|----------------------------|
//! | `LOGIN`    | `<account_id>`                                | `LOGIN OK <account_id>`    |
//! | `PING`     | anything                                      | `PONG <body>`              |
//! | `INV`      | `<character_id>`                              | `INV <character_id> ...`   |
//! | `INV`      | `<character_id> <slot> <kind> <vnum> <amount>`| `INV OK <inventory_id>`    |
//! | `QUIT`     | none                                          | `QUIT OK`, then disconnect |
//!
//! Writing an `INV` stack with amount `0` empties the slot.

use std::str::FromStr;
use std::sync::Arc;

use ember_data::{
    DeleteResult, GeneralLogRepository, InMemoryGeneralLog, InMemoryInventory, InventoryEntry,
    InventoryRepository,
};
use ember_net::{
    ClientSession, HandlerError, HandlerRegistry, Packet, PacketHandler, RegistryError,
};

/// Log type recorded for logins.
pub const CONNECTION_LOG_TYPE: &str = "Connection";

/// Repositories shared by all handlers.
pub struct ServerContext {
    pub inventory: Arc<dyn InventoryRepository>,
    pub general_log: Arc<dyn GeneralLogRepository>,
}

impl ServerContext {
    /// Context backed by in-memory repositories.
    pub fn in_memory() -> Self {
        Self {
            inventory: Arc::new(InMemoryInventory::new()),
            general_log: Arc::new(InMemoryGeneralLog::new()),
        }
    }
}

/// Registry with every built-in handler.
pub fn build_registry(ctx: &Arc<ServerContext>) -> Result<Arc<HandlerRegistry>, RegistryError> {
    let mut builder = HandlerRegistry::builder();
    builder
        .register("LOGIN", LoginHandler(Arc::clone(ctx)))?
        .register("PING", ping)?
        .register("INV", InventoryHandler(Arc::clone(ctx)))?
        .register("QUIT", quit)?;
    Ok(builder.build())
}

fn arg<T: FromStr>(args: &mut dyn Iterator<Item = &str>, name: &str) -> Result<T, HandlerError> {
    let raw = args
        .next()
        .ok_or_else(|| HandlerError::Malformed(format!("missing {name}")))?;
    raw.parse()
        .map_err(|_| HandlerError::Malformed(format!("invalid {name}: {raw}")))
}

struct LoginHandler(Arc<ServerContext>);

impl PacketHandler for LoginHandler {
    fn handle(&self, session: &ClientSession, packet: &Packet) -> Result<(), HandlerError> {
        let account_id: i64 = arg(&mut packet.args(), "account id")?;
        let ip = session.peer().ip().to_string();

        self.0
            .general_log
            .write(account_id, &ip, None, CONNECTION_LOG_TYPE, "LOGIN");
        tracing::info!(
            connection_id = %session.id(),
            account_id,
            "account logged in"
        );

        session.send_packet(&Packet::new("LOGIN", format!("OK {account_id}")))?;
        Ok(())
    }
}

fn ping(session: &ClientSession, packet: &Packet) -> Result<(), HandlerError> {
    session.send_packet(&Packet::new("PONG", packet.body.as_str()))?;
    Ok(())
}

struct InventoryHandler(Arc<ServerContext>);

impl InventoryHandler {
    fn list(&self, session: &ClientSession, character_id: i64) -> Result<(), HandlerError> {
        let mut body = character_id.to_string();
        for entry in self.0.inventory.load_by_character(character_id) {
            body.push_str(&format!(
                " {}.{}.{}.{}",
                entry.slot, entry.kind, entry.item_vnum, entry.amount
            ));
        }
        session.send_packet(&Packet::new("INV", body))?;
        Ok(())
    }

    fn put(
        &self,
        session: &ClientSession,
        character_id: i64,
        args: &mut dyn Iterator<Item = &str>,
    ) -> Result<(), HandlerError> {
        let slot: i16 = arg(args, "slot")?;
        let kind: u8 = arg(args, "kind")?;
        let vnum: i16 = arg(args, "vnum")?;
        let amount: u16 = arg(args, "amount")?;

        if amount == 0 {
            let reply = match self
                .0
                .inventory
                .delete_from_slot_and_kind(character_id, slot, kind)
            {
                DeleteResult::Deleted => "OK",
                DeleteResult::NotFound => "EMPTY",
            };
            session.send_packet(&Packet::new("INV", reply))?;
            return Ok(());
        }

        let stored = self
            .0
            .inventory
            .insert_or_update(InventoryEntry::new(character_id, slot, kind, vnum, amount))
            .map_err(HandlerError::failed)?;
        let id = stored.inventory_id.unwrap_or_default();
        session.send_packet(&Packet::new("INV", format!("OK {id}")))?;
        Ok(())
    }
}

impl PacketHandler for InventoryHandler {
    fn handle(&self, session: &ClientSession, packet: &Packet) -> Result<(), HandlerError> {
        let mut args = packet.args();
        let character_id: i64 = arg(&mut args, "character id")?;
        if packet.args().nth(1).is_none() {
            self.list(session, character_id)
        } else {
            self.put(session, character_id, &mut args)
        }
    }
}

fn quit(session: &ClientSession, _: &Packet) -> Result<(), HandlerError> {
    session.send_packet(&Packet::new("QUIT", "OK"))?;
    session.disconnect();
    Ok(())
}
