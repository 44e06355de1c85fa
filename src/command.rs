//! Command table and handlers.
//!
//! Handlers run against the keyspace and return a [`Reply`]; the server
//! encodes it and queues it on the client. Replies are encoded as single
//! string objects so the common ones can be shared between reply lists.

use crate::ae::get_current_time_ms;
use crate::db::GodisDb;
use crate::error::CommandError;
use crate::object::{GType, Gobj, GobjRef};

pub type CommandProc = fn(&mut GodisDb, &[GobjRef]) -> Reply;

pub struct GodisCommand {
    pub name: &'static str,
    pub proc_: CommandProc,
    /// Exact argument count, command name included.
    pub arity: usize,
}

pub static COMMAND_TABLE: &[GodisCommand] = &[
    GodisCommand {
        name: "get",
        proc_: get_command,
        arity: 2,
    },
    GodisCommand {
        name: "set",
        proc_: set_command,
        arity: 3,
    },
    GodisCommand {
        name: "expire",
        proc_: expire_command,
        arity: 3,
    },
];

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Nil,
    Bulk(GobjRef),
    Err(CommandError),
}

/// Replies that are identical for every client.
#[derive(Debug)]
pub struct SharedObjects {
    pub ok: GobjRef,
    pub nil: GobjRef,
}

impl Default for SharedObjects {
    fn default() -> Self {
        Self {
            ok: Gobj::create_str("+OK\r\n"),
            nil: Gobj::create_str("$-1\r\n"),
        }
    }
}

impl Reply {
    pub fn encode(&self, shared: &SharedObjects) -> GobjRef {
        match self {
            Reply::Ok => shared.ok.clone(),
            Reply::Nil => shared.nil.clone(),
            Reply::Bulk(val) => {
                let payload = val.str_val().unwrap_or_default();
                // the length prefix is not CRLF-terminated on this wire
                let mut out = format!("${}", payload.len()).into_bytes();
                out.extend_from_slice(payload);
                out.extend_from_slice(b"\r\n");
                Gobj::create_str(out)
            }
            Reply::Err(err) => Gobj::create_str(format!("-ERR: {err}\r\n")),
        }
    }
}

/// Outcome of dispatching one parsed command.
#[derive(Debug, PartialEq)]
pub enum Dispatch {
    Reply(Reply),
    Quit,
}

pub fn lookup_command(name: &[u8]) -> Option<&'static GodisCommand> {
    COMMAND_TABLE
        .iter()
        .find(|cmd| cmd.name.as_bytes().eq_ignore_ascii_case(name))
}

/// Resolves `args[0]` and runs the handler. `args` must not be empty.
pub fn process_command(db: &mut GodisDb, args: &[GobjRef]) -> Dispatch {
    let name = args[0].str_val().unwrap_or_default();
    if name.eq_ignore_ascii_case(b"quit") {
        return Dispatch::Quit;
    }
    let shown = String::from_utf8_lossy(name).into_owned();
    let Some(cmd) = lookup_command(name) else {
        return Dispatch::Reply(Reply::Err(CommandError::UnknownCommand(shown)));
    };
    if cmd.arity != args.len() {
        return Dispatch::Reply(Reply::Err(CommandError::WrongArity(shown)));
    }
    Dispatch::Reply((cmd.proc_)(db, args))
}

fn get_command(db: &mut GodisDb, args: &[GobjRef]) -> Reply {
    match db.find_key_read(&args[1]) {
        None => Reply::Nil,
        Some(val) if val.gtype() == GType::Str => Reply::Bulk(val),
        Some(_) => Reply::Err(CommandError::WrongType),
    }
}

fn set_command(db: &mut GodisDb, args: &[GobjRef]) -> Reply {
    let (key, val) = (&args[1], &args[2]);
    if val.gtype() != GType::Str {
        return Reply::Err(CommandError::WrongType);
    }
    db.set_key(key.clone(), val.clone());
    Reply::Ok
}

fn expire_command(db: &mut GodisDb, args: &[GobjRef]) -> Reply {
    let when = args[2]
        .int_val()
        .and_then(|secs| secs.checked_mul(1000))
        .and_then(|ms| ms.checked_add(get_current_time_ms()));
    let Some(when) = when else {
        return Reply::Err(CommandError::NotInteger);
    };
    db.set_expire(args[1].clone(), when);
    Reply::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<GobjRef> {
        parts.iter().map(|p| Gobj::create_str(*p)).collect()
    }

    fn run(db: &mut GodisDb, parts: &[&str]) -> String {
        match process_command(db, &args(parts)) {
            Dispatch::Reply(reply) => reply.encode(&SharedObjects::default()).display(),
            Dispatch::Quit => "QUIT".to_string(),
        }
    }

    #[test]
    fn test_set_get_expire() {
        let mut db = GodisDb::new();
        assert_eq!(run(&mut db, &["SET", "x", "5"]), "+OK\r\n");
        assert_eq!(run(&mut db, &["GET", "x"]), "$15\r\n");
        assert_eq!(run(&mut db, &["EXPIRE", "x", "0"]), "+OK\r\n");
        assert_eq!(run(&mut db, &["GET", "x"]), "$-1\r\n");
        assert!(db.data.is_empty());
        assert!(db.expire.is_empty());
    }

    #[test]
    fn test_get_missing() {
        let mut db = GodisDb::new();
        assert_eq!(run(&mut db, &["get", "nosuch"]), "$-1\r\n");
    }

    #[test]
    fn test_expire_in_future_keeps_key() {
        let mut db = GodisDb::new();
        run(&mut db, &["set", "k", "hello"]);
        assert_eq!(run(&mut db, &["expire", "k", "100"]), "+OK\r\n");
        assert_eq!(run(&mut db, &["get", "k"]), "$5hello\r\n");
        assert_eq!(db.expire.len(), 1);
    }

    #[test]
    fn test_expire_rejects_non_integer() {
        let mut db = GodisDb::new();
        assert_eq!(
            run(&mut db, &["expire", "k", "soon"]),
            "-ERR: value is not an integer or out of range\r\n"
        );
        assert!(db.expire.is_empty());
    }

    #[test]
    fn test_unknown_and_arity() {
        let mut db = GodisDb::new();
        assert_eq!(run(&mut db, &["PING"]), "-ERR: unknown command 'PING'\r\n");
        assert_eq!(
            run(&mut db, &["GET", "a", "b"]),
            "-ERR: wrong number of arguments for 'GET'\r\n"
        );
    }

    #[test]
    fn test_wrong_type() {
        let mut db = GodisDb::new();
        db.data.set(Gobj::create_str("n"), Gobj::create_int(7));
        assert_eq!(run(&mut db, &["GET", "n"]), "-ERR: wrong type\r\n");
    }

    #[test]
    fn test_quit_is_case_insensitive() {
        let mut db = GodisDb::new();
        assert_eq!(run(&mut db, &["QuIt"]), "QUIT");
    }

    #[test]
    fn test_shared_replies_are_shared() {
        let shared = SharedObjects::default();
        let a = Reply::Ok.encode(&shared);
        let b = Reply::Ok.encode(&shared);
        assert!(std::rc::Rc::ptr_eq(&a, &b));
    }
}
