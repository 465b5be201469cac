//! Expression lowering
//!
//! Most expressions only rebuild themselves from their lowered children.
//! Short-circuiting, null-propagating and pattern switching expressions
//! introduce blocks: their result is written to a flow capture on every
//! path and read back through a capture reference.

use super::stmt::{assignment, is_pattern};
use super::GraphBuilder;
use crate::cfg::block::BlockId;
use crate::cfg::region::{RegionBuilder, RegionKind};
use crate::error::{CfgError, Result};
use crate::operation::{
    BinaryOperatorKind, CaptureId, ConstantValue, MethodId, OpRef, Operation, OperationKind, Pattern,
    SwitchArm, TypeRef, UnaryOperatorKind,
};
use crate::semantic::WellKnownMember;

impl GraphBuilder {
    pub(super) fn visit_expression(&mut self, operation: &OpRef) -> Result<OpRef> {
        match &operation.kind {
            OperationKind::Literal
            | OperationKind::LocalReference(_)
            | OperationKind::ParameterReference(_)
            | OperationKind::InstanceReference
            | OperationKind::CaughtException
            | OperationKind::FlowCaptureReference(_)
            | OperationKind::StaticLocalInitializationSemaphore(_) => Ok(operation.clone()),

            OperationKind::ConditionalAccessInstance => Ok(self
                .conditional_access_instance
                .clone()
                .unwrap_or_else(|| operation.clone())),

            OperationKind::FieldReference { instance, field } => {
                let instance = match instance {
                    Some(instance) => Some(self.visit_expression(instance)?),
                    None => None,
                };
                Ok(Operation::rebuild(
                    operation,
                    OperationKind::FieldReference {
                        instance,
                        field: field.clone(),
                    },
                ))
            }

            OperationKind::Invocation {
                method,
                instance,
                arguments,
            } => {
                let instance = match instance {
                    Some(instance) => {
                        let value = self.visit_expression(instance)?;
                        self.push_operand(value);
                        true
                    }
                    None => false,
                };
                let arguments = self.visit_array(arguments)?;
                let instance = instance.then(|| self.pop_operand());
                Ok(Operation::rebuild(
                    operation,
                    OperationKind::Invocation {
                        method: *method,
                        instance,
                        arguments,
                    },
                ))
            }

            OperationKind::Binary {
                op,
                left,
                right,
                operator_method,
                unary_operator_method,
                is_lifted,
            } => {
                if op.is_conditional() {
                    return self.visit_logical(operation, *op, left, right, *operator_method, *unary_operator_method);
                }
                let left = self.visit_expression(left)?;
                self.push_operand(left);
                let right = self.visit_expression(right)?;
                let left = self.pop_operand();
                Ok(Operation::rebuild(
                    operation,
                    OperationKind::Binary {
                        op: *op,
                        left,
                        right,
                        operator_method: *operator_method,
                        unary_operator_method: *unary_operator_method,
                        is_lifted: *is_lifted,
                    },
                ))
            }

            OperationKind::Unary {
                op,
                operand,
                operator_method,
            } => {
                let operand = self.visit_expression(operand)?;
                Ok(Operation::rebuild(
                    operation,
                    OperationKind::Unary {
                        op: *op,
                        operand,
                        operator_method: *operator_method,
                    },
                ))
            }

            OperationKind::Conversion { operand, method } => {
                let operand = self.visit_expression(operand)?;
                Ok(Operation::rebuild(
                    operation,
                    OperationKind::Conversion {
                        operand,
                        method: *method,
                    },
                ))
            }

            OperationKind::SimpleAssignment { target, value } => {
                let (target, value) = self.visit_pair(target, value)?;
                Ok(Operation::rebuild(operation, OperationKind::SimpleAssignment { target, value }))
            }

            OperationKind::CompoundAssignment { op, target, value } => {
                let (target, value) = self.visit_pair(target, value)?;
                Ok(Operation::rebuild(
                    operation,
                    OperationKind::CompoundAssignment { op: *op, target, value },
                ))
            }

            OperationKind::Coalesce { value, when_null } => self.visit_coalesce(operation, value, when_null),

            OperationKind::CoalesceAssignment { target, value } => self
                .visit_coalesce_assignment(operation, target, value, false)
                .map(|result| result.unwrap_or_else(|| operation.clone())),

            OperationKind::ConditionalAccess {
                receiver,
                when_not_null,
            } => self
                .visit_conditional_access(operation, receiver, when_not_null, false)
                .map(|result| result.unwrap_or_else(|| operation.clone())),

            OperationKind::Conditional {
                condition,
                when_true,
                when_false: Some(when_false),
            } => self.visit_ternary(operation, condition, when_true, when_false),

            OperationKind::SwitchExpression { value, arms } => self.visit_switch_expression(operation, value, arms),

            OperationKind::IsPattern { value, pattern } => {
                let value = self.visit_expression(value)?;
                self.push_operand(value);
                let pattern = self.visit_pattern(pattern)?;
                let value = self.pop_operand();
                Ok(Operation::rebuild(operation, OperationKind::IsPattern { value, pattern }))
            }

            OperationKind::IsNull(operand) => {
                let operand = self.visit_expression(operand)?;
                Ok(Operation::rebuild(operation, OperationKind::IsNull(operand)))
            }

            OperationKind::Await(operand) => {
                let operand = self.visit_expression(operand)?;
                Ok(Operation::rebuild(operation, OperationKind::Await(operand)))
            }

            OperationKind::Throw { exception } => {
                let exception = match exception {
                    Some(exception) => Some(self.visit_expression(exception)?),
                    None => None,
                };
                self.link_throw(exception);
                let mut placeholder = Operation::new(OperationKind::Invalid(Vec::new())).implicit();
                placeholder.ty = operation.ty.clone();
                Ok(placeholder.into_ref())
            }

            OperationKind::AnonymousFunction { method, .. } => {
                let ordinal = self.anonymous_functions.len() as u32;
                self.anonymous_functions
                    .push((*method, self.current_region, operation.clone()));
                Ok(Operation::rebuild(
                    operation,
                    OperationKind::FlowAnonymousFunction {
                        method: *method,
                        ordinal,
                    },
                ))
            }

            OperationKind::ObjectCreation { constructor, arguments } => {
                let arguments = self.visit_array(arguments)?;
                Ok(Operation::rebuild(
                    operation,
                    OperationKind::ObjectCreation {
                        constructor: *constructor,
                        arguments,
                    },
                ))
            }

            OperationKind::ArrayCreation { sizes, elements } => {
                let all: Vec<OpRef> = sizes.iter().chain(elements).cloned().collect();
                let mut sizes = self.visit_array(&all)?;
                let elements = sizes.split_off(all.len() - elements.len());
                Ok(Operation::rebuild(operation, OperationKind::ArrayCreation { sizes, elements }))
            }

            OperationKind::Invalid(children) => {
                let children = self.visit_array(children)?;
                Ok(Operation::rebuild(operation, OperationKind::Invalid(children)))
            }

            _ => Err(CfgError::UnsupportedOperation {
                kind: operation.kind_name(),
            }),
        }
    }

    /// Visit two operands left to right
    fn visit_pair(&mut self, first: &OpRef, second: &OpRef) -> Result<(OpRef, OpRef)> {
        let first = self.visit_expression(first)?;
        self.push_operand(first);
        let second = self.visit_expression(second)?;
        let first = self.pop_operand();
        Ok((first, second))
    }

    fn visit_pattern(&mut self, pattern: &Pattern) -> Result<Pattern> {
        Ok(match pattern {
            Pattern::Constant(value) => Pattern::Constant(self.visit_expression(value)?),
            Pattern::Relational { op, value } => Pattern::Relational {
                op: *op,
                value: self.visit_expression(value)?,
            },
            Pattern::Not(inner) => Pattern::Not(Box::new(self.visit_pattern(inner)?)),
            Pattern::Discard | Pattern::Type(_) | Pattern::Declaration { .. } => pattern.clone(),
        })
    }

    // ---------------------------------------------------------------------
    // Conditional branches
    // ---------------------------------------------------------------------

    /// Branch to `destination` when `condition` equals `jump_if_true`,
    /// allocating the destination on first use
    pub(super) fn visit_conditional_branch(
        &mut self,
        condition: &OpRef,
        destination: &mut Option<BlockId>,
        jump_if_true: bool,
    ) -> Result<()> {
        self.spill_eval_stack();
        let frame = self.push_stack_frame();
        self.visit_conditional_branch_core(condition, destination, jump_if_true)?;
        self.pop_stack_frame_and_leave_region(frame);
        Ok(())
    }

    fn visit_conditional_branch_core(
        &mut self,
        condition: &OpRef,
        destination: &mut Option<BlockId>,
        jump_if_true: bool,
    ) -> Result<()> {
        match &condition.kind {
            OperationKind::Binary {
                op,
                left,
                right,
                operator_method: None,
                is_lifted: false,
                ..
            } if op.is_conditional() && is_plain_boolean(condition, left, right) => {
                let is_and = *op == BinaryOperatorKind::ConditionalAnd;
                if is_and == jump_if_true {
                    // The left operand decides the other way: skip the right
                    let mut fallthrough = None;
                    self.visit_conditional_branch_core(left, &mut fallthrough, !jump_if_true)?;
                    self.visit_conditional_branch_core(right, destination, jump_if_true)?;
                    if let Some(fallthrough) = fallthrough {
                        self.append_new_block(fallthrough, true);
                    }
                } else {
                    self.visit_conditional_branch_core(left, destination, jump_if_true)?;
                    self.visit_conditional_branch_core(right, destination, jump_if_true)?;
                }
                Ok(())
            }

            OperationKind::Unary {
                op: UnaryOperatorKind::Not,
                operand,
                operator_method: None,
            } if condition.is_boolean() && operand.is_boolean() => {
                self.visit_conditional_branch_core(operand, destination, !jump_if_true)
            }

            OperationKind::Conditional {
                condition: test,
                when_true,
                when_false: Some(when_false),
            } if condition.is_boolean() && when_true.is_boolean() && when_false.is_boolean() => {
                let mut false_arm = None;
                self.visit_conditional_branch_core(test, &mut false_arm, false)?;
                self.visit_conditional_branch_core(when_true, destination, jump_if_true)?;
                let after = self.new_block();
                self.unconditional_branch(after);
                let false_arm = false_arm.unwrap_or_else(|| self.new_block());
                self.append_new_block(false_arm, true);
                self.visit_conditional_branch_core(when_false, destination, jump_if_true)?;
                self.append_new_block(after, true);
                Ok(())
            }

            _ => {
                let value = self.visit_expression(condition)?;
                let target = *destination.get_or_insert_with(|| self.new_block());
                self.conditional_branch(value, jump_if_true, target);
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------------
    // Value-producing control flow
    // ---------------------------------------------------------------------

    fn visit_ternary(
        &mut self,
        operation: &OpRef,
        condition: &OpRef,
        when_true: &OpRef,
        when_false: &OpRef,
    ) -> Result<OpRef> {
        self.spill_eval_stack();
        let result = self.new_capture_in_current();

        let mut false_arm = None;
        self.visit_conditional_branch(condition, &mut false_arm, false)?;
        let after = self.new_block();
        self.capture_arm(when_true, result, after)?;

        let false_arm = false_arm.unwrap_or_else(|| self.new_block());
        self.append_new_block(false_arm, true);
        self.capture_arm(when_false, result, after)?;
        self.append_new_block(after, true);

        Ok(Operation::capture_reference(result, operation))
    }

    /// Write one arm's value to `result` and jump to `after`; a throwing arm
    /// ends its block instead
    fn capture_arm(&mut self, value: &OpRef, result: CaptureId, after: BlockId) -> Result<()> {
        if let OperationKind::Throw { exception } = &value.kind {
            let frame = self.push_stack_frame();
            let exception = match exception {
                Some(exception) => Some(self.visit_expression(exception)?),
                None => None,
            };
            self.link_throw(exception);
            self.pop_stack_frame_and_leave_region(frame);
            return Ok(());
        }
        self.visit_and_capture_into(value, result)?;
        self.unconditional_branch(after);
        Ok(())
    }

    fn visit_logical(
        &mut self,
        operation: &OpRef,
        op: BinaryOperatorKind,
        left: &OpRef,
        right: &OpRef,
        operator_method: Option<MethodId>,
        unary_operator_method: Option<MethodId>,
    ) -> Result<OpRef> {
        let is_and = op == BinaryOperatorKind::ConditionalAnd;
        let left_is_dynamic = left.ty.as_ref().is_some_and(TypeRef::is_dynamic);
        if operator_method.is_some() || left_is_dynamic {
            return self.visit_user_defined_logical(operation, is_and, left, right, operator_method, unary_operator_method);
        }
        let ty = operation.ty.clone();
        if ty.as_ref().is_some_and(TypeRef::is_nullable_boolean) {
            return self.visit_nullable_logical(operation, is_and, left, right);
        }
        if ty.as_ref().is_some_and(TypeRef::is_object) {
            return self.visit_object_logical(operation, is_and, left, right);
        }

        self.spill_eval_stack();
        let result = self.new_capture_in_current();
        let mut short_circuit = None;
        self.visit_conditional_branch(left, &mut short_circuit, !is_and)?;
        self.visit_and_capture_into(right, result)?;
        let done = self.new_block();
        self.unconditional_branch(done);

        let short_circuit = short_circuit.unwrap_or_else(|| self.new_block());
        self.append_new_block(short_circuit, true);
        let constant = implicit_bool(!is_and, TypeRef::boolean());
        self.add_statement(Operation::flow_capture(result, constant));
        self.append_new_block(done, true);

        Ok(Operation::capture_reference(result, operation))
    }

    /// `bool?` operands: the result is the left value when it already
    /// decides the outcome, otherwise whichever operand does
    fn visit_nullable_logical(&mut self, operation: &OpRef, is_and: bool, left: &OpRef, right: &OpRef) -> Result<OpRef> {
        self.spill_eval_stack();
        let result = self.new_capture_in_current();
        let result_is_left = self.new_block();

        let left_ref = self.visit_and_capture(left)?;
        let deciding_left = self.nullable_is(&left_ref, !is_and);
        self.visit_conditional_branch(&deciding_left, &mut Some(result_is_left), true)?;

        let right_ref = self.visit_and_capture(right)?;
        let keeps_left = self.nullable_is(&right_ref, is_and);
        self.visit_conditional_branch(&keeps_left, &mut Some(result_is_left), true)?;
        self.add_statement(Operation::flow_capture(result, right_ref));
        let done = self.new_block();
        self.unconditional_branch(done);

        self.append_new_block(result_is_left, true);
        self.add_statement(Operation::flow_capture(result, left_ref));
        self.append_new_block(done, true);

        Ok(Operation::capture_reference(result, operation))
    }

    /// Test that a `bool?` holds `value`
    fn nullable_is(&self, operand: &OpRef, value: bool) -> OpRef {
        let unwrapped = self.helper_call(
            WellKnownMember::NullableGetValueOrDefault,
            Some(operand.clone()),
            Vec::new(),
            Some(TypeRef::boolean()),
        );
        if value {
            return unwrapped;
        }
        let has_value = self.helper_call(
            WellKnownMember::NullableHasValue,
            Some(operand.clone()),
            Vec::new(),
            Some(TypeRef::boolean()),
        );
        let negated = Operation::new(OperationKind::Unary {
            op: UnaryOperatorKind::Not,
            operand: unwrapped,
            operator_method: None,
        })
        .with_type(TypeRef::boolean())
        .implicit()
        .into_ref();
        implicit_binary(BinaryOperatorKind::ConditionalAnd, negated, has_value)
    }

    /// User-defined and late bound operators: `operator false` (or `true`)
    /// on the left decides whether the right operand is evaluated
    fn visit_user_defined_logical(
        &mut self,
        operation: &OpRef,
        is_and: bool,
        left: &OpRef,
        right: &OpRef,
        operator_method: Option<MethodId>,
        unary_operator_method: Option<MethodId>,
    ) -> Result<OpRef> {
        self.spill_eval_stack();
        let result = self.new_capture_in_current();
        let result_is_left = self.new_block();

        let left_ref = self.visit_and_capture(left)?;
        let test = Operation::new(OperationKind::Unary {
            op: if is_and {
                UnaryOperatorKind::False
            } else {
                UnaryOperatorKind::True
            },
            operand: left_ref.clone(),
            operator_method: unary_operator_method,
        })
        .with_type(TypeRef::boolean())
        .implicit()
        .into_ref();
        self.visit_conditional_branch(&test, &mut Some(result_is_left), true)?;

        let frame = self.push_stack_frame();
        let right = self.visit_expression(right)?;
        let mut combined = Operation::new(OperationKind::Binary {
            op: if is_and {
                BinaryOperatorKind::And
            } else {
                BinaryOperatorKind::Or
            },
            left: left_ref.clone(),
            right,
            operator_method,
            unary_operator_method: None,
            is_lifted: false,
        })
        .implicit();
        combined.ty = operation.ty.clone();
        self.capture_result_if_not_already(result, combined.into_ref());
        self.pop_stack_frame_and_leave_region(frame);
        let done = self.new_block();
        self.unconditional_branch(done);

        self.append_new_block(result_is_left, true);
        self.add_statement(Operation::flow_capture(result, left_ref));
        self.append_new_block(done, true);

        Ok(Operation::capture_reference(result, operation))
    }

    /// Late bound `AndAlso`/`OrElse` over objects: evaluate as booleans and
    /// box the outcome
    fn visit_object_logical(&mut self, operation: &OpRef, is_and: bool, left: &OpRef, right: &OpRef) -> Result<OpRef> {
        self.spill_eval_stack();
        let result = self.new_capture_in_current();

        let mut short_circuit = None;
        let left = convert(left.clone(), TypeRef::boolean());
        self.visit_conditional_branch(&left, &mut short_circuit, !is_and)?;

        let frame = self.push_stack_frame();
        let right = self.visit_expression(&convert(right.clone(), TypeRef::boolean()))?;
        self.capture_result_if_not_already(result, convert(right, TypeRef::object()));
        self.pop_stack_frame_and_leave_region(frame);
        let done = self.new_block();
        self.unconditional_branch(done);

        let short_circuit = short_circuit.unwrap_or_else(|| self.new_block());
        self.append_new_block(short_circuit, true);
        let constant = convert(implicit_bool(!is_and, TypeRef::boolean()), TypeRef::object());
        self.add_statement(Operation::flow_capture(result, constant));
        self.append_new_block(done, true);

        Ok(Operation::capture_reference(result, operation))
    }

    fn visit_coalesce(&mut self, operation: &OpRef, value: &OpRef, when_null: &OpRef) -> Result<OpRef> {
        self.spill_eval_stack();
        let result = self.new_capture_in_current();

        let test_region = self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime));
        let tested = self.next_capture_id(test_region);
        self.visit_and_capture_into(value, tested)?;
        let tested_ref = Operation::capture_reference(tested, value);

        let when_null_block = self.new_block();
        self.conditional_branch(Operation::is_null(tested_ref.clone()), true, when_null_block);
        let unwrapped = self.unwrap_nullable(tested_ref, operation.ty.as_ref());
        self.add_statement(Operation::flow_capture(result, unwrapped));
        let after = self.new_block();
        self.unconditional_branch(after);
        self.leave_region();

        self.append_new_block(when_null_block, true);
        self.capture_arm(when_null, result, after)?;
        self.append_new_block(after, true);

        Ok(Operation::capture_reference(result, operation))
    }

    /// `target ??= value`. Returns the result reference, or `None` when
    /// lowered as a statement
    pub(super) fn visit_coalesce_assignment(
        &mut self,
        operation: &OpRef,
        target: &OpRef,
        value: &OpRef,
        is_statement: bool,
    ) -> Result<Option<OpRef>> {
        self.spill_eval_stack();
        let result = (!is_statement).then(|| self.new_capture_in_current());

        let test_region = self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime));
        let target_id = self.next_capture_id(test_region);
        self.visit_and_capture_into(target, target_id)?;
        let target_ref = Operation::capture_reference(target_id, target);

        let when_null = self.new_block();
        self.conditional_branch(Operation::is_null(target_ref.clone()), true, when_null);
        if let Some(result) = result {
            let unwrapped = self.unwrap_nullable(target_ref.clone(), operation.ty.as_ref());
            self.add_statement(Operation::flow_capture(result, unwrapped));
        }
        let after = self.new_block();
        self.unconditional_branch(after);

        self.append_new_block(when_null, true);
        let frame = self.push_stack_frame();
        let value = self.visit_expression(value)?;
        let assigned = assignment(target_ref, value);
        match result {
            Some(result) => self.capture_result_if_not_already(result, assigned),
            None => self.add_statement(implicit_statement(assigned)),
        }
        self.pop_stack_frame_and_leave_region(frame);
        self.leave_region();
        self.append_new_block(after, true);

        Ok(result.map(|result| Operation::capture_reference(result, operation)))
    }

    /// `receiver?.member`. Returns the result reference, or `None` when
    /// lowered as a statement
    pub(super) fn visit_conditional_access(
        &mut self,
        operation: &OpRef,
        receiver: &OpRef,
        when_not_null: &OpRef,
        is_statement: bool,
    ) -> Result<Option<OpRef>> {
        self.spill_eval_stack();
        let result = (!is_statement).then(|| self.new_capture_in_current());

        let test_region = self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime));
        let receiver_id = self.next_capture_id(test_region);
        self.visit_and_capture_into(receiver, receiver_id)?;
        let receiver_ref = Operation::capture_reference(receiver_id, receiver);

        let when_null = self.new_block();
        self.conditional_branch(Operation::is_null(receiver_ref.clone()), true, when_null);

        let instance = match receiver.ty.as_ref() {
            Some(ty) if ty.is_nullable() => self.helper_call(
                WellKnownMember::NullableGetValueOrDefault,
                Some(receiver_ref),
                Vec::new(),
                Some(ty.underlying().clone()),
            ),
            _ => receiver_ref,
        };
        let saved = self.conditional_access_instance.replace(instance);
        let frame = self.push_stack_frame();
        let value = self.visit_expression(when_not_null);
        self.conditional_access_instance = saved;
        let value = value?;
        match result {
            Some(result) => {
                // `a?.b` is nullable even when `b` is not
                let value = match (&operation.ty, &value.ty) {
                    (Some(ty), Some(value_ty)) if ty.is_nullable() && !value_ty.is_nullable() => {
                        convert(value, ty.clone())
                    }
                    _ => value,
                };
                self.capture_result_if_not_already(result, value);
            }
            None => self.add_statement(implicit_statement(value)),
        }
        self.pop_stack_frame_and_leave_region(frame);
        let after = self.new_block();
        self.unconditional_branch(after);
        self.leave_region();

        self.append_new_block(when_null, true);
        if let Some(result) = result {
            let ty = operation.ty.clone().unwrap_or_else(TypeRef::object);
            let default = Operation::new(OperationKind::Literal)
                .with_type(ty)
                .with_constant(ConstantValue::Null)
                .implicit()
                .into_ref();
            self.add_statement(Operation::flow_capture(result, default));
        }
        self.append_new_block(after, true);

        Ok(result.map(|result| Operation::capture_reference(result, operation)))
    }

    fn visit_switch_expression(&mut self, operation: &OpRef, value: &OpRef, arms: &[SwitchArm]) -> Result<OpRef> {
        self.spill_eval_stack();
        let result = self.new_capture_in_current();

        let switch_region = self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime));
        let value_id = self.next_capture_id(switch_region);
        self.visit_and_capture_into(value, value_id)?;
        let value_ref = Operation::capture_reference(value_id, value);
        let after = self.new_block();

        for arm in arms {
            self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(arm.locals.clone()));
            let mut next_arm = Some(self.new_block());
            let test = is_pattern(value_ref.clone(), arm.pattern.clone());
            self.visit_conditional_branch(&test, &mut next_arm, false)?;
            if let Some(guard) = &arm.guard {
                self.visit_conditional_branch(guard, &mut next_arm, false)?;
            }
            self.capture_arm(&arm.value, result, after)?;
            self.leave_region();
            if let Some(next_arm) = next_arm {
                self.append_new_block(next_arm, true);
            }
        }

        let semantics = &self.family.semantics;
        let failure = Operation::new(OperationKind::ObjectCreation {
            constructor: semantics.well_known_member(WellKnownMember::MatchFailureExceptionCtor),
            arguments: Vec::new(),
        })
        .with_type(semantics.match_failure_exception_type())
        .implicit()
        .into_ref();
        self.link_throw(Some(failure));
        self.leave_region();
        self.append_new_block(after, true);

        Ok(Operation::capture_reference(result, operation))
    }

    /// `GetValueOrDefault()` when a nullable value flows into a non-nullable
    /// result
    fn unwrap_nullable(&self, value: OpRef, result_ty: Option<&TypeRef>) -> OpRef {
        let value_is_nullable = value.ty.as_ref().is_some_and(TypeRef::is_nullable);
        let result_is_nullable = result_ty.is_some_and(TypeRef::is_nullable);
        if value_is_nullable && !result_is_nullable {
            let ty = result_ty.cloned();
            return self.helper_call(WellKnownMember::NullableGetValueOrDefault, Some(value), Vec::new(), ty);
        }
        value
    }
}

fn is_plain_boolean(operation: &Operation, left: &Operation, right: &Operation) -> bool {
    operation.is_boolean() && left.is_boolean() && right.is_boolean()
}

fn implicit_bool(value: bool, ty: TypeRef) -> OpRef {
    Operation::new(OperationKind::Literal)
        .with_type(ty)
        .with_constant(ConstantValue::Bool(value))
        .implicit()
        .into_ref()
}

fn implicit_binary(op: BinaryOperatorKind, left: OpRef, right: OpRef) -> OpRef {
    Operation::new(OperationKind::Binary {
        op,
        left,
        right,
        operator_method: None,
        unary_operator_method: None,
        is_lifted: false,
    })
    .with_type(TypeRef::boolean())
    .implicit()
    .into_ref()
}

fn implicit_statement(expression: OpRef) -> OpRef {
    Operation::new(OperationKind::ExpressionStatement(expression))
        .implicit()
        .into_ref()
}

fn convert(operand: OpRef, ty: TypeRef) -> OpRef {
    Operation::new(OperationKind::Conversion { operand, method: None })
        .with_type(ty)
        .implicit()
        .into_ref()
}
