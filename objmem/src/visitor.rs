use crate::Value;

pub trait Visitable {
    /// Visit every reference-carrying field.
    fn visit_edges(&self, visitor: &mut impl Visitor);
    /// Visit every field that belongs to the object graph and may be
    /// rewritten in place.
    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor);
}

pub trait Visitor: Sized {
    fn visit(&mut self, value: Value) {
        let _ = value;
    }
    fn visit_mut(&mut self, value: &mut Value) {
        self.visit(*value);
    }
}

/// Collects every visited reference.
#[derive(Debug, Default)]
pub struct EdgeCollector {
    pub edges: Vec<Value>,
}

impl Visitor for EdgeCollector {
    #[inline]
    fn visit(&mut self, value: Value) {
        if value.is_ref() {
            self.edges.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair(Value, Value);

    impl Visitable for Pair {
        fn visit_edges(&self, visitor: &mut impl Visitor) {
            visitor.visit(self.0);
            visitor.visit(self.1);
        }
        fn visit_edges_mut(&mut self, visitor: &mut impl Visitor) {
            visitor.visit_mut(&mut self.0);
            visitor.visit_mut(&mut self.1);
        }
    }

    struct Bump;

    impl Visitor for Bump {
        fn visit_mut(&mut self, value: &mut Value) {
            if let Some(n) = value.as_i64() {
                *value = Value::from_i64(n + 1);
            }
        }
    }

    #[test]
    fn collector_skips_immediates() {
        let pair = Pair(Value::from_oop(1), Value::from_i64(3));
        let mut collector = EdgeCollector::default();
        pair.visit_edges(&mut collector);
        assert_eq!(collector.edges, vec![Value::from_oop(1)]);
    }

    #[test]
    fn mutable_visit_rewrites() {
        let mut pair = Pair(Value::from_i64(1), Value::NIL);
        pair.visit_edges_mut(&mut Bump);
        assert_eq!(pair.0, Value::from_i64(2));
        assert_eq!(pair.1, Value::NIL);
    }
}
