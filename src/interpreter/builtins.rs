use std::{collections::HashMap, io::Write};

use super::value::Val;
use crate::error::RuntimeError;

/// Host function callable from scripts. Receives the interpreter's output
/// sink and the already evaluated arguments.
pub type Builtin = fn(&mut dyn Write, &[Val]) -> Result<Val, RuntimeError>;

pub fn builtins() -> HashMap<&'static str, Builtin> {
    let mut map: HashMap<&'static str, Builtin> = HashMap::new();
    map.insert("echo", echo);
    map.insert("echoln", echoln);
    map
}

fn echo(out: &mut dyn Write, args: &[Val]) -> Result<Val, RuntimeError> {
    for v in args {
        write!(out, "{}", v)?;
    }
    out.flush()?;
    Ok(Val::Nil)
}

fn echoln(out: &mut dyn Write, args: &[Val]) -> Result<Val, RuntimeError> {
    for v in args {
        write!(out, "{}", v)?;
    }
    writeln!(out)?;
    out.flush()?;
    Ok(Val::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_concatenates() {
        let mut out = Vec::new();
        let ret = echo(&mut out, &[Val::Str("n: ".into()), Val::Int(5)]).unwrap();
        assert_eq!(ret, Val::Nil);
        assert_eq!(String::from_utf8(out).unwrap(), "n: 5");
    }

    #[test]
    fn test_echoln_appends_newline() {
        let mut out = Vec::new();
        echoln(&mut out, &[Val::Bool(true), Val::Nil]).unwrap();
        echoln(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "truenil\n\n");
    }

    #[test]
    fn test_registry() {
        let map = builtins();
        assert!(map.contains_key("echo"));
        assert!(map.contains_key("echoln"));
        assert_eq!(map.len(), 2);
    }
}
