//! Command table and dispatch.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use tracing::trace;

use crate::protocol::RespValue;
use crate::server::ServerStats;
use crate::storage::Keyspace;

use super::handler;

/// A command body. `args[0]` is the command name as the client sent it.
pub type CommandFn = fn(&mut CommandContext<'_>, &[Bytes]) -> RespValue;

/// Number of arguments a command takes, counting the name itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Arity::Exact(n) => argc == n,
            Arity::AtLeast(n) => argc >= n,
        }
    }
}

/// A registered command.
#[derive(Clone, Copy)]
pub struct Command {
    /// Lowercase name
    pub name: &'static str,
    pub arity: Arity,
    pub handler: CommandFn,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Everything a command body may touch.
pub struct CommandContext<'a> {
    pub keyspace: &'a mut Keyspace,
    pub stats: &'a ServerStats,
    /// Set by QUIT: close the connection once the reply is written
    pub quit: bool,
}

impl<'a> CommandContext<'a> {
    pub fn new(keyspace: &'a mut Keyspace, stats: &'a ServerStats) -> Self {
        Self {
            keyspace,
            stats,
            quit: false,
        }
    }
}

/// Name -> command lookup.
#[derive(Debug)]
pub struct CommandTable {
    commands: HashMap<&'static str, Command>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    /// Creates a table holding every built-in command.
    pub fn new() -> Self {
        let mut table = Self {
            commands: HashMap::new(),
        };
        for command in handler::builtin_commands() {
            table.insert(command);
        }
        table
    }

    /// Adds or replaces a command. The name is stored lowercase.
    pub fn insert(&mut self, command: Command) {
        debug_assert!(command.name.bytes().all(|b| !b.is_ascii_uppercase()));
        self.commands.insert(command.name, command);
    }

    /// Looks a command up by name, ignoring ASCII case.
    pub fn lookup(&self, name: &[u8]) -> Option<&Command> {
        let lower = name.to_ascii_lowercase();
        std::str::from_utf8(&lower)
            .ok()
            .and_then(|name| self.commands.get(name))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Runs one command and returns its reply.
    ///
    /// Unknown commands and arity mismatches become error replies; the
    /// connection stays usable.
    pub fn dispatch(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        let Some(name) = args.first() else {
            return RespValue::error("ERR empty command");
        };

        let Some(command) = self.lookup(name) else {
            return RespValue::error(format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(name)
            ));
        };

        if !command.arity.accepts(args.len()) {
            return wrong_arity(command.name);
        }

        trace!(command = command.name, argc = args.len(), "Dispatching command");
        (command.handler)(ctx, args)
    }
}

pub(crate) fn wrong_arity(name: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch(table: &CommandTable, args: &[&str]) -> RespValue {
        let mut keyspace = Keyspace::new();
        let stats = ServerStats::new();
        let mut ctx = CommandContext::new(&mut keyspace, &stats);
        let args: Vec<Bytes> = args.iter().map(|s| Bytes::from(s.to_string())).collect();
        table.dispatch(&mut ctx, &args)
    }

    #[test]
    fn test_arity() {
        assert!(Arity::Exact(2).accepts(2));
        assert!(!Arity::Exact(2).accepts(3));
        assert!(Arity::AtLeast(2).accepts(5));
        assert!(!Arity::AtLeast(2).accepts(1));
    }

    #[test]
    fn test_lookup_ignores_case() {
        let table = CommandTable::new();
        assert_eq!(table.lookup(b"GET").map(|c| c.name), Some("get"));
        assert_eq!(table.lookup(b"gEt").map(|c| c.name), Some("get"));
        assert!(table.lookup(b"\xff").is_none());
    }

    #[test]
    fn test_unknown_command() {
        let table = CommandTable::new();
        assert_eq!(
            dispatch(&table, &["FOO", "bar"]),
            RespValue::error("ERR unknown command 'FOO'")
        );
    }

    #[test]
    fn test_wrong_arity() {
        let table = CommandTable::new();
        assert_eq!(
            dispatch(&table, &["GET"]),
            RespValue::error("ERR wrong number of arguments for 'get' command")
        );
        assert_eq!(
            dispatch(&table, &["get", "a", "b"]),
            RespValue::error("ERR wrong number of arguments for 'get' command")
        );
    }

    #[test]
    fn test_custom_command() {
        fn hello(_: &mut CommandContext<'_>, _: &[Bytes]) -> RespValue {
            RespValue::simple_string("HELLO")
        }

        let mut table = CommandTable::new();
        let before = table.len();
        table.insert(Command {
            name: "hello",
            arity: Arity::Exact(1),
            handler: hello,
        });

        assert_eq!(table.len(), before + 1);
        assert_eq!(dispatch(&table, &["HELLO"]), RespValue::simple_string("HELLO"));
    }
}
