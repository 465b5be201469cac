//! Operation kinds and their payloads

use super::{CaptureId, LabelId, LocalId, MethodId, OpRef, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperatorKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    LeftShift,
    RightShift,
    And,
    Or,
    ExclusiveOr,
    ConditionalAnd,
    ConditionalOr,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Concatenate,
}

impl BinaryOperatorKind {
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            BinaryOperatorKind::ConditionalAnd | BinaryOperatorKind::ConditionalOr
        )
    }

    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            BinaryOperatorKind::Equals
                | BinaryOperatorKind::NotEquals
                | BinaryOperatorKind::LessThan
                | BinaryOperatorKind::LessThanOrEqual
                | BinaryOperatorKind::GreaterThan
                | BinaryOperatorKind::GreaterThanOrEqual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperatorKind {
    Not,
    Minus,
    Plus,
    BitwiseNegation,
    /// `operator true`
    True,
    /// `operator false`
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    Break,
    Continue,
    GoTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    Return,
    YieldReturn,
    YieldBreak,
}

/// `name = initializer` inside a declaration group
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclarator {
    pub local: LocalId,
    pub ty: TypeRef,
    pub initializer: Option<OpRef>,
    /// Function-level static; initialized once under a semaphore
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub locals: Vec<LocalId>,
    pub exception_type: TypeRef,
    /// Target receiving the caught exception, usually a local reference
    pub exception_target: Option<OpRef>,
    pub filter: Option<OpRef>,
    pub handler: OpRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UsingResources {
    Declarations(Vec<VariableDeclarator>),
    Expression(OpRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForEachInfo {
    pub enumerator_type: TypeRef,
    pub element_type: TypeRef,
    pub get_enumerator: MethodId,
    pub move_next: MethodId,
    pub current: MethodId,
    /// The enumerator is disposable and needs a finally
    pub needs_dispose: bool,
    /// The collection expression refers to a local with the same symbol as
    /// the control variable, which then needs its own lifetime
    pub collection_uses_control_local: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForToFlavor {
    /// Built-in numeric arithmetic and comparisons
    Numeric,
    /// Arithmetic and comparisons through user-defined operators
    UserDefined {
        addition: MethodId,
        subtraction: MethodId,
        less_than_or_equal: MethodId,
        greater_than_or_equal: MethodId,
    },
    /// Late bound loop driven entirely by two runtime helpers
    Object { loop_object: LocalId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Discard,
    Constant(OpRef),
    Type(TypeRef),
    /// `T name`, binding the matched value to a local
    Declaration { ty: TypeRef, local: Option<LocalId> },
    Relational { op: BinaryOperatorKind, value: OpRef },
    Not(Box<Pattern>),
}

impl Pattern {
    fn collect_operands<'a>(&'a self, operands: &mut Vec<&'a OpRef>) {
        match self {
            Pattern::Constant(value) | Pattern::Relational { value, .. } => operands.push(value),
            Pattern::Not(inner) => inner.collect_operands(operands),
            Pattern::Discard | Pattern::Type(_) | Pattern::Declaration { .. } => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseClauseKind {
    SingleValue(OpRef),
    Relational { op: BinaryOperatorKind, value: OpRef },
    Range { min: OpRef, max: OpRef },
    Pattern { pattern: Pattern, guard: Option<OpRef> },
    Default,
    /// Clause the binder could not make sense of
    Invalid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseClause {
    pub label: Option<LabelId>,
    pub kind: CaseClauseKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub locals: Vec<LocalId>,
    pub clauses: Vec<CaseClause>,
    /// Section-wide condition, evaluated after any clause matched
    pub condition: Option<OpRef>,
    pub body: Vec<OpRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    pub locals: Vec<LocalId>,
    pub pattern: Pattern,
    pub guard: Option<OpRef>,
    pub value: OpRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    // Statements
    Block {
        locals: Vec<LocalId>,
        statements: Vec<OpRef>,
    },
    VariableDeclarationGroup(Vec<VariableDeclarator>),
    ExpressionStatement(OpRef),
    /// `if` as a statement, `?:` as an expression
    Conditional {
        condition: OpRef,
        when_true: OpRef,
        when_false: Option<OpRef>,
    },
    While {
        locals: Vec<LocalId>,
        condition: Option<OpRef>,
        body: OpRef,
        condition_is_top: bool,
        condition_is_until: bool,
        continue_label: LabelId,
        exit_label: LabelId,
    },
    For {
        locals: Vec<LocalId>,
        before: Vec<OpRef>,
        condition: Option<OpRef>,
        at_loop_bottom: Vec<OpRef>,
        body: OpRef,
        continue_label: LabelId,
        exit_label: LabelId,
    },
    ForEach {
        locals: Vec<LocalId>,
        control: OpRef,
        collection: OpRef,
        body: OpRef,
        info: ForEachInfo,
        continue_label: LabelId,
        exit_label: LabelId,
    },
    ForTo {
        locals: Vec<LocalId>,
        control: OpRef,
        initial: OpRef,
        limit: OpRef,
        step: OpRef,
        body: OpRef,
        flavor: ForToFlavor,
        continue_label: LabelId,
        exit_label: LabelId,
    },
    Try {
        body: OpRef,
        catches: Vec<CatchClause>,
        finally: Option<OpRef>,
        exit_label: Option<LabelId>,
    },
    Using {
        locals: Vec<LocalId>,
        resources: UsingResources,
        body: OpRef,
    },
    Lock {
        target: OpRef,
        body: OpRef,
        lock_taken: Option<LocalId>,
    },
    Switch {
        locals: Vec<LocalId>,
        value: OpRef,
        cases: Vec<SwitchCase>,
        exit_label: LabelId,
    },
    Return {
        kind: ReturnKind,
        value: Option<OpRef>,
    },
    /// `throw e;`, `throw;` when `exception` is absent, or a throw expression
    Throw {
        exception: Option<OpRef>,
    },
    Branch {
        kind: BranchKind,
        target: LabelId,
    },
    Labeled {
        label: LabelId,
        statement: Option<OpRef>,
    },
    Empty,
    /// Unconditional program termination
    End,
    LocalFunction {
        method: MethodId,
        body: OpRef,
    },

    // Expressions
    Literal,
    LocalReference(LocalId),
    ParameterReference(u32),
    FieldReference {
        instance: Option<OpRef>,
        field: String,
    },
    InstanceReference,
    Invocation {
        method: MethodId,
        instance: Option<OpRef>,
        arguments: Vec<OpRef>,
    },
    Binary {
        op: BinaryOperatorKind,
        left: OpRef,
        right: OpRef,
        operator_method: Option<MethodId>,
        /// `operator true`/`operator false` used by a user-defined `&&`/`||`
        unary_operator_method: Option<MethodId>,
        is_lifted: bool,
    },
    Unary {
        op: UnaryOperatorKind,
        operand: OpRef,
        operator_method: Option<MethodId>,
    },
    Conversion {
        operand: OpRef,
        method: Option<MethodId>,
    },
    SimpleAssignment {
        target: OpRef,
        value: OpRef,
    },
    CompoundAssignment {
        op: BinaryOperatorKind,
        target: OpRef,
        value: OpRef,
    },
    Coalesce {
        value: OpRef,
        when_null: OpRef,
    },
    CoalesceAssignment {
        target: OpRef,
        value: OpRef,
    },
    ConditionalAccess {
        receiver: OpRef,
        when_not_null: OpRef,
    },
    /// Placeholder for the receiver inside `when_not_null`
    ConditionalAccessInstance,
    SwitchExpression {
        value: OpRef,
        arms: Vec<SwitchArm>,
    },
    IsPattern {
        value: OpRef,
        pattern: Pattern,
    },
    Await(OpRef),
    AnonymousFunction {
        method: MethodId,
        body: OpRef,
    },
    ObjectCreation {
        constructor: Option<MethodId>,
        arguments: Vec<OpRef>,
    },
    ArrayCreation {
        sizes: Vec<OpRef>,
        elements: Vec<OpRef>,
    },
    Invalid(Vec<OpRef>),

    // Produced only by the graph builder
    FlowCapture {
        id: CaptureId,
        value: OpRef,
    },
    FlowCaptureReference(CaptureId),
    IsNull(OpRef),
    CaughtException,
    /// A lambda hoisted out of the graph; `ordinal` indexes the owning
    /// graph's anonymous function table
    FlowAnonymousFunction {
        method: MethodId,
        ordinal: u32,
    },
    StaticLocalInitializationSemaphore(LocalId),
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Block { .. } => "Block",
            OperationKind::VariableDeclarationGroup(_) => "VariableDeclarationGroup",
            OperationKind::ExpressionStatement(_) => "ExpressionStatement",
            OperationKind::Conditional { .. } => "Conditional",
            OperationKind::While { .. } => "While",
            OperationKind::For { .. } => "For",
            OperationKind::ForEach { .. } => "ForEach",
            OperationKind::ForTo { .. } => "ForTo",
            OperationKind::Try { .. } => "Try",
            OperationKind::Using { .. } => "Using",
            OperationKind::Lock { .. } => "Lock",
            OperationKind::Switch { .. } => "Switch",
            OperationKind::Return { .. } => "Return",
            OperationKind::Throw { .. } => "Throw",
            OperationKind::Branch { .. } => "Branch",
            OperationKind::Labeled { .. } => "Labeled",
            OperationKind::Empty => "Empty",
            OperationKind::End => "End",
            OperationKind::LocalFunction { .. } => "LocalFunction",
            OperationKind::Literal => "Literal",
            OperationKind::LocalReference(_) => "LocalReference",
            OperationKind::ParameterReference(_) => "ParameterReference",
            OperationKind::FieldReference { .. } => "FieldReference",
            OperationKind::InstanceReference => "InstanceReference",
            OperationKind::Invocation { .. } => "Invocation",
            OperationKind::Binary { .. } => "Binary",
            OperationKind::Unary { .. } => "Unary",
            OperationKind::Conversion { .. } => "Conversion",
            OperationKind::SimpleAssignment { .. } => "SimpleAssignment",
            OperationKind::CompoundAssignment { .. } => "CompoundAssignment",
            OperationKind::Coalesce { .. } => "Coalesce",
            OperationKind::CoalesceAssignment { .. } => "CoalesceAssignment",
            OperationKind::ConditionalAccess { .. } => "ConditionalAccess",
            OperationKind::ConditionalAccessInstance => "ConditionalAccessInstance",
            OperationKind::SwitchExpression { .. } => "SwitchExpression",
            OperationKind::IsPattern { .. } => "IsPattern",
            OperationKind::Await(_) => "Await",
            OperationKind::AnonymousFunction { .. } => "AnonymousFunction",
            OperationKind::ObjectCreation { .. } => "ObjectCreation",
            OperationKind::ArrayCreation { .. } => "ArrayCreation",
            OperationKind::Invalid(_) => "Invalid",
            OperationKind::FlowCapture { .. } => "FlowCapture",
            OperationKind::FlowCaptureReference(_) => "FlowCaptureReference",
            OperationKind::IsNull(_) => "IsNull",
            OperationKind::CaughtException => "CaughtException",
            OperationKind::FlowAnonymousFunction { .. } => "FlowAnonymousFunction",
            OperationKind::StaticLocalInitializationSemaphore(_) => {
                "StaticLocalInitializationSemaphore"
            }
        }
    }

    /// Direct operand and statement children, in evaluation order
    pub fn children(&self) -> Vec<&OpRef> {
        let mut children = Vec::new();
        match self {
            OperationKind::Block { statements, .. } => children.extend(statements),
            OperationKind::VariableDeclarationGroup(declarators) => {
                children.extend(declarators.iter().filter_map(|d| d.initializer.as_ref()));
            }
            OperationKind::ExpressionStatement(expression)
            | OperationKind::Await(expression)
            | OperationKind::IsNull(expression) => children.push(expression),
            OperationKind::Conditional {
                condition,
                when_true,
                when_false,
            } => {
                children.push(condition);
                children.push(when_true);
                children.extend(when_false);
            }
            OperationKind::While { condition, body, .. } => {
                children.extend(condition);
                children.push(body);
            }
            OperationKind::For {
                before,
                condition,
                at_loop_bottom,
                body,
                ..
            } => {
                children.extend(before);
                children.extend(condition);
                children.push(body);
                children.extend(at_loop_bottom);
            }
            OperationKind::ForEach {
                control,
                collection,
                body,
                ..
            } => {
                children.push(collection);
                children.push(control);
                children.push(body);
            }
            OperationKind::ForTo {
                control,
                initial,
                limit,
                step,
                body,
                ..
            } => children.extend([control, initial, limit, step, body]),
            OperationKind::Try { body, catches, finally, .. } => {
                children.push(body);
                for catch in catches {
                    children.extend(&catch.exception_target);
                    children.extend(&catch.filter);
                    children.push(&catch.handler);
                }
                children.extend(finally);
            }
            OperationKind::Using { resources, body, .. } => {
                match resources {
                    UsingResources::Declarations(declarators) => {
                        children.extend(declarators.iter().filter_map(|d| d.initializer.as_ref()));
                    }
                    UsingResources::Expression(resource) => children.push(resource),
                }
                children.push(body);
            }
            OperationKind::Lock { target, body, .. } => {
                children.push(target);
                children.push(body);
            }
            OperationKind::Switch { value, cases, .. } => {
                children.push(value);
                for case in cases {
                    for clause in &case.clauses {
                        match &clause.kind {
                            CaseClauseKind::SingleValue(value) | CaseClauseKind::Relational { value, .. } => {
                                children.push(value);
                            }
                            CaseClauseKind::Range { min, max } => {
                                children.push(min);
                                children.push(max);
                            }
                            CaseClauseKind::Pattern { pattern, guard } => {
                                pattern.collect_operands(&mut children);
                                children.extend(guard);
                            }
                            CaseClauseKind::Default | CaseClauseKind::Invalid => {}
                        }
                    }
                    children.extend(&case.condition);
                    children.extend(&case.body);
                }
            }
            OperationKind::Return { value, .. } => children.extend(value),
            OperationKind::Throw { exception } => children.extend(exception),
            OperationKind::Labeled { statement, .. } => children.extend(statement),
            OperationKind::LocalFunction { body, .. } | OperationKind::AnonymousFunction { body, .. } => {
                children.push(body);
            }
            OperationKind::FieldReference { instance, .. } => children.extend(instance),
            OperationKind::Invocation { instance, arguments, .. } => {
                children.extend(instance);
                children.extend(arguments);
            }
            OperationKind::Binary { left, right, .. } => {
                children.push(left);
                children.push(right);
            }
            OperationKind::Unary { operand, .. } | OperationKind::Conversion { operand, .. } => {
                children.push(operand);
            }
            OperationKind::SimpleAssignment { target, value }
            | OperationKind::CompoundAssignment { target, value, .. }
            | OperationKind::CoalesceAssignment { target, value } => {
                children.push(target);
                children.push(value);
            }
            OperationKind::Coalesce { value, when_null } => {
                children.push(value);
                children.push(when_null);
            }
            OperationKind::ConditionalAccess {
                receiver,
                when_not_null,
            } => {
                children.push(receiver);
                children.push(when_not_null);
            }
            OperationKind::SwitchExpression { value, arms } => {
                children.push(value);
                for arm in arms {
                    arm.pattern.collect_operands(&mut children);
                    children.extend(&arm.guard);
                    children.push(&arm.value);
                }
            }
            OperationKind::IsPattern { value, pattern } => {
                children.push(value);
                pattern.collect_operands(&mut children);
            }
            OperationKind::ObjectCreation { arguments, .. } => children.extend(arguments),
            OperationKind::ArrayCreation { sizes, elements } => {
                children.extend(sizes);
                children.extend(elements);
            }
            OperationKind::Invalid(operands) => children.extend(operands),
            OperationKind::FlowCapture { value, .. } => children.push(value),
            OperationKind::Branch { .. }
            | OperationKind::Empty
            | OperationKind::End
            | OperationKind::Literal
            | OperationKind::LocalReference(_)
            | OperationKind::ParameterReference(_)
            | OperationKind::InstanceReference
            | OperationKind::ConditionalAccessInstance
            | OperationKind::FlowCaptureReference(_)
            | OperationKind::CaughtException
            | OperationKind::FlowAnonymousFunction { .. }
            | OperationKind::StaticLocalInitializationSemaphore(_) => {}
        }
        children
    }

    /// Kinds that only ever appear in a finished graph
    pub fn is_flow_only(&self) -> bool {
        matches!(
            self,
            OperationKind::FlowCapture { .. }
                | OperationKind::FlowCaptureReference(_)
                | OperationKind::IsNull(_)
                | OperationKind::CaughtException
                | OperationKind::FlowAnonymousFunction { .. }
                | OperationKind::StaticLocalInitializationSemaphore(_)
        )
    }
}
