use super::VisitMut;
use hcl::{
    template::{Directive, Element},
    Body, Expression, Operation, Structure, Template, TemplateExpr, TraversalOperator,
};

/// Recursively visit all [hcl::Expression]s mutably
///
/// Children are visited before their parent, so a visitor replacing a function call sees its arguments already
/// rewritten.
pub trait VisitExpressionsMut {
    fn visit_expressions_mut(&mut self, visitor: &mut dyn VisitMut<Expression>);
}

impl VisitExpressionsMut for Body {
    fn visit_expressions_mut(&mut self, visitor: &mut dyn VisitMut<Expression>) {
        for structure in self {
            match structure {
                Structure::Attribute(attr) => attr.expr.visit_expressions_mut(visitor),
                Structure::Block(block) => block.body.visit_expressions_mut(visitor),
            }
        }
    }
}

impl VisitExpressionsMut for Expression {
    fn visit_expressions_mut(&mut self, visitor: &mut dyn VisitMut<Expression>) {
        match self {
            Expression::Traversal(traversal) => {
                traversal.expr.visit_expressions_mut(visitor);
                for operator in traversal.operators.iter_mut() {
                    if let TraversalOperator::Index(index) = operator {
                        index.visit_expressions_mut(visitor);
                    }
                }
            }
            Expression::Array(array) => {
                for expr in array {
                    expr.visit_expressions_mut(visitor);
                }
            }
            Expression::Object(object) => {
                for value in object.values_mut() {
                    value.visit_expressions_mut(visitor);
                }
            }
            Expression::TemplateExpr(template_expr) => {
                if let Ok(mut template) = Template::from_expr(template_expr) {
                    if template.visit_expressions_mut(visitor) {
                        *template_expr = Box::new(TemplateExpr::QuotedString(template.to_string()));
                    }
                }
            }
            Expression::FuncCall(call) => {
                for arg in call.args.iter_mut() {
                    arg.visit_expressions_mut(visitor);
                }
            }
            Expression::Parenthesis(expr) => {
                expr.visit_expressions_mut(visitor);
            }
            Expression::Conditional(cond) => {
                cond.cond_expr.visit_expressions_mut(visitor);
                cond.true_expr.visit_expressions_mut(visitor);
                cond.false_expr.visit_expressions_mut(visitor);
            }
            Expression::Operation(operation) => match operation.as_mut() {
                Operation::Binary(binop) => {
                    binop.lhs_expr.visit_expressions_mut(visitor);
                    binop.rhs_expr.visit_expressions_mut(visitor);
                }
                Operation::Unary(unop) => {
                    unop.expr.visit_expressions_mut(visitor);
                }
            },
            Expression::ForExpr(forexpr) => {
                forexpr.collection_expr.visit_expressions_mut(visitor);
                forexpr
                    .key_expr
                    .iter_mut()
                    .for_each(|e| e.visit_expressions_mut(visitor));
                forexpr.value_expr.visit_expressions_mut(visitor);
                forexpr
                    .cond_expr
                    .iter_mut()
                    .for_each(|e| e.visit_expressions_mut(visitor));
            }
            _ => {}
        }

        visitor.visit_mut(self);
    }
}

/// Templates are only written back when they contain an interpolation
trait VisitTemplateMut {
    fn visit_expressions_mut(&mut self, visitor: &mut dyn VisitMut<Expression>) -> bool;
}

impl VisitTemplateMut for Template {
    fn visit_expressions_mut(&mut self, visitor: &mut dyn VisitMut<Expression>) -> bool {
        let mut touched = false;
        for element in self.elements_mut() {
            match element {
                Element::Interpolation(interpolation) => {
                    interpolation.expr.visit_expressions_mut(visitor);
                    touched = true;
                }
                Element::Directive(directive) => {
                    match directive {
                        Directive::If(ifdir) => {
                            ifdir.cond_expr.visit_expressions_mut(visitor);
                            ifdir.true_template.visit_expressions_mut(visitor);
                            ifdir
                                .false_template
                                .iter_mut()
                                .for_each(|t| {
                                    t.visit_expressions_mut(visitor);
                                });
                        }
                        Directive::For(fordir) => {
                            fordir.collection_expr.visit_expressions_mut(visitor);
                            fordir.template.visit_expressions_mut(visitor);
                        }
                    }
                    touched = true;
                }
                Element::Literal(_) => {}
            }
        }
        touched
    }
}
