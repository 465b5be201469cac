//! Loop lowering

use super::stmt::assignment;
use super::GraphBuilder;
use crate::cfg::region::{RegionBuilder, RegionKind, RegionId};
use crate::error::{CfgError, Result};
use crate::operation::{
    BinaryOperatorKind, ForToFlavor, MethodId, OpRef, Operation, OperationKind, TypeRef,
};
use crate::semantic::WellKnownMember;

impl GraphBuilder {
    pub(super) fn visit_while(&mut self, statement: &OpRef) -> Result<()> {
        let OperationKind::While {
            locals,
            condition,
            body,
            condition_is_top,
            condition_is_until,
            continue_label,
            exit_label,
        } = &statement.kind
        else {
            return Err(unsupported(statement));
        };
        let continue_block = self.labeled_or_new_block(Some(*continue_label));
        let mut exit_block = Some(self.labeled_or_new_block(Some(*exit_label)));

        if *condition_is_top {
            self.append_new_block(continue_block, true);
            self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(locals.clone()));
            if let Some(condition) = condition {
                self.visit_conditional_branch(condition, &mut exit_block, *condition_is_until)?;
            }
            self.visit_statement(body)?;
            self.unconditional_branch(continue_block);
            self.leave_region();
        } else {
            let start = self.new_block();
            self.append_new_block(start, true);
            self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(locals.clone()));
            self.visit_statement(body)?;
            self.append_new_block(continue_block, true);
            match condition {
                Some(condition) => {
                    self.visit_conditional_branch(condition, &mut Some(start), !*condition_is_until)?;
                }
                None => self.unconditional_branch(start),
            }
            self.leave_region();
        }

        if let Some(exit_block) = exit_block {
            self.append_new_block(exit_block, true);
        }
        Ok(())
    }

    pub(super) fn visit_for(&mut self, statement: &OpRef) -> Result<()> {
        let OperationKind::For {
            locals,
            before,
            condition,
            at_loop_bottom,
            body,
            continue_label,
            exit_label,
        } = &statement.kind
        else {
            return Err(unsupported(statement));
        };
        let continue_block = self.labeled_or_new_block(Some(*continue_label));
        let mut exit_block = Some(self.labeled_or_new_block(Some(*exit_label)));

        self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(locals.clone()));
        self.visit_statements(before)?;
        let start = self.new_block();
        self.append_new_block(start, true);
        if let Some(condition) = condition {
            self.visit_conditional_branch(condition, &mut exit_block, false)?;
        }
        self.visit_statement(body)?;
        self.append_new_block(continue_block, true);
        self.visit_statements(at_loop_bottom)?;
        self.unconditional_branch(start);
        self.leave_region();

        if let Some(exit_block) = exit_block {
            self.append_new_block(exit_block, true);
        }
        Ok(())
    }

    pub(super) fn visit_for_each(&mut self, statement: &OpRef) -> Result<()> {
        let OperationKind::ForEach {
            locals,
            control,
            collection,
            body,
            info,
            continue_label,
            exit_label,
        } = &statement.kind
        else {
            return Err(unsupported(statement));
        };
        let continue_block = self.labeled_or_new_block(Some(*continue_label));
        let exit_block = self.labeled_or_new_block(Some(*exit_label));

        let enumerator_region = self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime));
        let enumerator_id = self.next_capture_id(enumerator_region);
        let get_enumerator = implicit_call(info.get_enumerator, collection.clone(), info.enumerator_type.clone());
        if info.collection_uses_control_local {
            self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(locals.clone()));
            self.visit_and_capture_into(&get_enumerator, enumerator_id)?;
            self.leave_region();
        } else {
            self.visit_and_capture_into(&get_enumerator, enumerator_id)?;
        }
        let enumerator = Operation::capture_reference(enumerator_id, &get_enumerator);

        if info.needs_dispose {
            self.enter_region(RegionBuilder::new(RegionKind::TryAndFinally));
            self.enter_region(RegionBuilder::new(RegionKind::Try));
        }

        self.append_new_block(continue_block, true);
        let move_next = implicit_call(info.move_next, enumerator.clone(), TypeRef::boolean());
        self.visit_conditional_branch(&move_next, &mut Some(exit_block), false)?;

        self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(locals.clone()));
        let frame = self.push_stack_frame();
        let target = self.visit_expression(control)?;
        let current = implicit_call(info.current, enumerator.clone(), info.element_type.clone());
        self.add_statement(assignment(target, current));
        self.pop_stack_frame_and_leave_region(frame);
        self.visit_statement(body)?;
        self.unconditional_branch(continue_block);
        self.leave_region();

        if info.needs_dispose {
            self.leave_region();
            self.add_disposing_finally(enumerator);
            self.leave_region();
        }
        self.leave_region();
        self.append_new_block(exit_block, true);
        Ok(())
    }

    /// `For control = initial To limit Step step`
    pub(super) fn visit_for_to(&mut self, statement: &OpRef) -> Result<()> {
        let OperationKind::ForTo {
            locals,
            control,
            initial,
            limit,
            step,
            body,
            flavor,
            continue_label,
            exit_label,
        } = &statement.kind
        else {
            return Err(unsupported(statement));
        };
        let continue_block = self.labeled_or_new_block(Some(*continue_label));
        let exit_block = self.labeled_or_new_block(Some(*exit_label));
        let loop_region = self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(locals.clone()));

        match flavor {
            ForToFlavor::Object { loop_object } => {
                let loop_object = Operation::local(*loop_object, TypeRef::object());
                let frame = self.push_stack_frame();
                let mut arguments = self.visit_array(&[control.clone(), initial.clone(), limit.clone(), step.clone()])?;
                arguments.push(loop_object.clone());
                arguments.push(arguments[0].clone());
                let init = self.helper_call(WellKnownMember::ForLoopInitObj, None, arguments, Some(TypeRef::boolean()));
                self.conditional_branch(init, false, exit_block);
                self.pop_stack_frame_and_leave_region(frame);

                let body_start = self.new_block();
                self.append_new_block(body_start, true);
                self.visit_statement(body)?;
                self.append_new_block(continue_block, true);

                let frame = self.push_stack_frame();
                let control_value = self.visit_expression(control)?;
                let check = self.helper_call(
                    WellKnownMember::ForNextCheckObj,
                    None,
                    vec![control_value.clone(), loop_object, control_value],
                    Some(TypeRef::boolean()),
                );
                self.conditional_branch(check, true, body_start);
                self.pop_stack_frame_and_leave_region(frame);
            }
            ForToFlavor::Numeric | ForToFlavor::UserDefined { .. } => {
                let operators = ForToOperators::of(flavor);
                // Control, initial value, limit and step are all evaluated
                // before the control variable is assigned
                let frame = self.push_stack_frame();
                let target = self.visit_expression(control)?;
                self.push_operand(target);
                let initial = self.visit_expression(initial)?;
                self.push_operand(initial);
                let limit = self.capture_unless_constant(limit, loop_region)?;
                let step = self.capture_unless_constant(step, loop_region)?;
                let initial = self.pop_operand();
                let target = self.pop_operand();
                self.add_statement(assignment(target, initial));
                self.pop_stack_frame_and_leave_region(frame);

                let step_is_positive = step_sign(&step);
                let positive_flag = match step_is_positive {
                    Some(_) => None,
                    None => {
                        let zero = operators.binary(BinaryOperatorKind::Subtract, step.clone(), step.clone(), step.ty.clone());
                        let flag = operators.binary(
                            BinaryOperatorKind::GreaterThanOrEqual,
                            step.clone(),
                            zero,
                            Some(TypeRef::boolean()),
                        );
                        let flag_id = self.next_capture_id(loop_region);
                        let frame = self.push_stack_frame();
                        let flag = self.visit_expression(&flag)?;
                        let flag_ref = Operation::capture_reference(flag_id, &flag);
                        self.capture_result_if_not_already(flag_id, flag);
                        self.pop_stack_frame_and_leave_region(frame);
                        Some(flag_ref)
                    }
                };

                let check = self.new_block();
                self.append_new_block(check, true);
                let up = operators.binary(
                    BinaryOperatorKind::LessThanOrEqual,
                    control.clone(),
                    limit.clone(),
                    Some(TypeRef::boolean()),
                );
                let down = operators.binary(
                    BinaryOperatorKind::GreaterThanOrEqual,
                    control.clone(),
                    limit,
                    Some(TypeRef::boolean()),
                );
                let condition = match (step_is_positive, positive_flag) {
                    (Some(true), _) => up,
                    (Some(false), _) => down,
                    (None, Some(flag)) => Operation::new(OperationKind::Conditional {
                        condition: flag,
                        when_true: up,
                        when_false: Some(down),
                    })
                    .with_type(TypeRef::boolean())
                    .implicit()
                    .into_ref(),
                    (None, None) => up,
                };
                self.visit_conditional_branch(&condition, &mut Some(exit_block), false)?;

                self.visit_statement(body)?;
                self.append_new_block(continue_block, true);
                let incremented = operators.binary(BinaryOperatorKind::Add, control.clone(), step, control.ty.clone());
                self.assign_control(control, &incremented)?;
                self.unconditional_branch(check);
            }
        }

        self.leave_region();
        self.append_new_block(exit_block, true);
        Ok(())
    }

    fn assign_control(&mut self, control: &OpRef, value: &OpRef) -> Result<()> {
        let frame = self.push_stack_frame();
        let target = self.visit_expression(control)?;
        self.push_operand(target);
        let value = self.visit_expression(value)?;
        let target = self.pop_operand();
        self.add_statement(assignment(target, value));
        self.pop_stack_frame_and_leave_region(frame);
        Ok(())
    }

    /// Evaluate a loop bound once, keeping constants inline
    fn capture_unless_constant(&mut self, value: &OpRef, owner: RegionId) -> Result<OpRef> {
        if value.constant.is_some() {
            return Ok(value.clone());
        }
        let id = self.next_capture_id(owner);
        self.visit_and_capture_into(value, id)?;
        Ok(Operation::capture_reference(id, value))
    }
}

/// Operators used by a numeric or user-defined `For ... To` loop
struct ForToOperators {
    addition: Option<MethodId>,
    subtraction: Option<MethodId>,
    less_than_or_equal: Option<MethodId>,
    greater_than_or_equal: Option<MethodId>,
}

impl ForToOperators {
    fn of(flavor: &ForToFlavor) -> Self {
        match flavor {
            ForToFlavor::UserDefined {
                addition,
                subtraction,
                less_than_or_equal,
                greater_than_or_equal,
            } => Self {
                addition: Some(*addition),
                subtraction: Some(*subtraction),
                less_than_or_equal: Some(*less_than_or_equal),
                greater_than_or_equal: Some(*greater_than_or_equal),
            },
            _ => Self {
                addition: None,
                subtraction: None,
                less_than_or_equal: None,
                greater_than_or_equal: None,
            },
        }
    }

    fn binary(&self, op: BinaryOperatorKind, left: OpRef, right: OpRef, ty: Option<TypeRef>) -> OpRef {
        let operator_method = match op {
            BinaryOperatorKind::Add => self.addition,
            BinaryOperatorKind::Subtract => self.subtraction,
            BinaryOperatorKind::LessThanOrEqual => self.less_than_or_equal,
            BinaryOperatorKind::GreaterThanOrEqual => self.greater_than_or_equal,
            _ => None,
        };
        let mut binary = Operation::new(OperationKind::Binary {
            op,
            left,
            right,
            operator_method,
            unary_operator_method: None,
            is_lifted: false,
        })
        .implicit();
        binary.ty = ty;
        binary.into_ref()
    }
}

/// Direction of a step known before the loop runs
fn step_sign(step: &Operation) -> Option<bool> {
    if let Some(TypeRef::Special(special)) = &step.ty {
        if special.is_unsigned() {
            return Some(true);
        }
    }
    step.constant.as_ref().and_then(|constant| constant.is_non_negative())
}

fn implicit_call(method: MethodId, instance: OpRef, ty: TypeRef) -> OpRef {
    Operation::new(OperationKind::Invocation {
        method,
        instance: Some(instance),
        arguments: Vec::new(),
    })
    .with_type(ty)
    .implicit()
    .into_ref()
}

fn unsupported(operation: &Operation) -> CfgError {
    CfgError::UnsupportedOperation {
        kind: operation.kind_name(),
    }
}
