//! Shorthand constructors for operation nodes.
//!
//! Used by the graph builder when it synthesizes operations, and by
//! callers assembling trees by hand.

use super::{
    BinaryOperatorKind, CaptureId, ConstantValue, LabelId, LocalId, MethodId, OpRef, Operation,
    OperationKind, ReturnKind, TypeRef, UnaryOperatorKind,
};

impl Operation {
    pub fn literal(value: ConstantValue, ty: TypeRef) -> OpRef {
        Operation::new(OperationKind::Literal)
            .with_type(ty)
            .with_constant(value)
            .into_ref()
    }

    pub fn bool_literal(value: bool) -> OpRef {
        Operation::literal(ConstantValue::Bool(value), TypeRef::boolean())
    }

    pub fn int_literal(value: i64) -> OpRef {
        Operation::literal(ConstantValue::Int(value), TypeRef::int32())
    }

    pub fn null_literal(ty: TypeRef) -> OpRef {
        Operation::literal(ConstantValue::Null, ty)
    }

    pub fn local(id: LocalId, ty: TypeRef) -> OpRef {
        Operation::new(OperationKind::LocalReference(id))
            .with_type(ty)
            .into_ref()
    }

    pub fn parameter(index: u32, ty: TypeRef) -> OpRef {
        Operation::new(OperationKind::ParameterReference(index))
            .with_type(ty)
            .into_ref()
    }

    pub fn call(method: MethodId, arguments: Vec<OpRef>, ty: Option<TypeRef>) -> OpRef {
        let mut op = Operation::new(OperationKind::Invocation {
            method,
            instance: None,
            arguments,
        });
        op.ty = ty;
        op.into_ref()
    }

    pub fn call_on(
        instance: OpRef,
        method: MethodId,
        arguments: Vec<OpRef>,
        ty: Option<TypeRef>,
    ) -> OpRef {
        let mut op = Operation::new(OperationKind::Invocation {
            method,
            instance: Some(instance),
            arguments,
        });
        op.ty = ty;
        op.into_ref()
    }

    pub fn binary(op: BinaryOperatorKind, left: OpRef, right: OpRef, ty: TypeRef) -> OpRef {
        Operation::new(OperationKind::Binary {
            op,
            left,
            right,
            operator_method: None,
            unary_operator_method: None,
            is_lifted: false,
        })
        .with_type(ty)
        .into_ref()
    }

    pub fn not(operand: OpRef) -> OpRef {
        let ty = operand.ty.clone().unwrap_or_else(TypeRef::boolean);
        Operation::new(OperationKind::Unary {
            op: UnaryOperatorKind::Not,
            operand,
            operator_method: None,
        })
        .with_type(ty)
        .into_ref()
    }

    pub fn assign(target: OpRef, value: OpRef) -> OpRef {
        let ty = target.ty.clone();
        let mut op = Operation::new(OperationKind::SimpleAssignment { target, value });
        op.ty = ty;
        op.into_ref()
    }

    pub fn expression_statement(expression: OpRef) -> OpRef {
        Operation::new(OperationKind::ExpressionStatement(expression)).into_ref()
    }

    pub fn block(locals: Vec<LocalId>, statements: Vec<OpRef>) -> OpRef {
        Operation::new(OperationKind::Block { locals, statements }).into_ref()
    }

    pub fn if_statement(condition: OpRef, when_true: OpRef, when_false: Option<OpRef>) -> OpRef {
        Operation::new(OperationKind::Conditional {
            condition,
            when_true,
            when_false,
        })
        .into_ref()
    }

    pub fn ternary(condition: OpRef, when_true: OpRef, when_false: OpRef, ty: TypeRef) -> OpRef {
        Operation::new(OperationKind::Conditional {
            condition,
            when_true,
            when_false: Some(when_false),
        })
        .with_type(ty)
        .into_ref()
    }

    pub fn return_value(value: Option<OpRef>) -> OpRef {
        Operation::new(OperationKind::Return {
            kind: ReturnKind::Return,
            value,
        })
        .into_ref()
    }

    pub fn throw(exception: Option<OpRef>) -> OpRef {
        Operation::new(OperationKind::Throw { exception }).into_ref()
    }

    pub fn goto(target: LabelId) -> OpRef {
        Operation::new(OperationKind::Branch {
            kind: super::BranchKind::GoTo,
            target,
        })
        .into_ref()
    }

    pub fn labeled(label: LabelId, statement: Option<OpRef>) -> OpRef {
        Operation::new(OperationKind::Labeled { label, statement }).into_ref()
    }

    pub fn invalid(children: Vec<OpRef>, ty: Option<TypeRef>) -> OpRef {
        let mut op = Operation::new(OperationKind::Invalid(children));
        op.ty = ty;
        op.into_ref()
    }

    pub(crate) fn flow_capture(id: CaptureId, value: OpRef) -> OpRef {
        let span = value.span;
        let mut op = Operation::new(OperationKind::FlowCapture { id, value }).implicit();
        op.span = span;
        op.into_ref()
    }

    pub(crate) fn capture_reference(id: CaptureId, of: &Operation) -> OpRef {
        let mut op = Operation::new(OperationKind::FlowCaptureReference(id)).implicit();
        op.ty = of.ty.clone();
        op.constant = of.constant.clone();
        op.span = of.span;
        op.into_ref()
    }

    pub(crate) fn is_null(operand: OpRef) -> OpRef {
        let span = operand.span;
        let mut op = Operation::new(OperationKind::IsNull(operand))
            .with_type(TypeRef::boolean())
            .implicit();
        op.span = span;
        op.into_ref()
    }

    /// Copy of `template` with its kind replaced, keeping the annotations
    pub(crate) fn rebuild(template: &Operation, kind: OperationKind) -> OpRef {
        Operation {
            kind,
            ty: template.ty.clone(),
            constant: template.constant.clone(),
            is_implicit: template.is_implicit,
            span: template.span,
        }
        .into_ref()
    }
}
