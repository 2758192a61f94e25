use std::fmt;

use crate::heap::Handle;

/// Tagged runtime value held on the operand stack and in frame locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Value {
    Int(i64),
    Bool(bool),
    #[default]
    Nil,
    /// Non-owning reference into the VM's [`crate::heap::Heap`].
    Ref(Handle),
}

impl Value {
    pub fn truthy(self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => b,
            Value::Int(n) => n != 0,
            Value::Ref(_) => true,
        }
    }

    /// Integer view used by arithmetic and comparison: booleans are 0/1,
    /// nil is 0, heap references have none.
    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(n),
            Value::Bool(b) => Some(b as i64),
            Value::Nil => Some(0),
            Value::Ref(_) => None,
        }
    }

    pub fn as_handle(self) -> Option<Handle> {
        match self {
            Value::Ref(h) => Some(h),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Ref(h)
    }
}

/// Textual form written by PRINT.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{}", *b as u8),
            Value::Nil => write!(f, "0"),
            Value::Ref(h) => write!(f, "<ref #{}>", h.index()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Heap, ObjType};

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::Bool(true).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(-1).truthy());

        let mut heap = Heap::new();
        let h = heap.alloc(0, ObjType::String).unwrap();
        assert!(Value::Ref(h).truthy());
    }

    #[test]
    fn integer_view() {
        assert_eq!(Value::Int(7).as_int(), Some(7));
        assert_eq!(Value::Bool(true).as_int(), Some(1));
        assert_eq!(Value::Nil.as_int(), Some(0));

        let mut heap = Heap::new();
        let h = heap.alloc(4, ObjType::Array).unwrap();
        assert_eq!(Value::Ref(h).as_int(), None);
        assert_eq!(Value::Ref(h).as_handle(), Some(h));
        assert_eq!(Value::Int(1).as_handle(), None);
    }

    #[test]
    fn print_form() {
        assert_eq!(Value::Int(-42).to_string(), "-42");
        assert_eq!(Value::Bool(true).to_string(), "1");
        assert_eq!(Value::Bool(false).to_string(), "0");
        assert_eq!(Value::Nil.to_string(), "0");
    }
}
