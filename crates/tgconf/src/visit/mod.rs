//! visitor pattern helpers
//!
//! Used to rewrite helper calls inside HCL expressions and to substitute placeholders in the strings of extension
//! items.
mod visit_expressions;
pub use visit_expressions::VisitExpressionsMut;

/// Visitor that mutates the subjects it visits
pub trait VisitMut<T> {
    fn visit_mut(&mut self, value: &mut T);
}

// closures are visitors
impl<T, F> VisitMut<T> for F
where
    F: FnMut(&mut T),
{
    fn visit_mut(&mut self, value: &mut T) {
        self(value)
    }
}
