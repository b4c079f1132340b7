//! IR to Cranelift translation and JIT finalization
//!
//! One Cranelift block per IR block, one Cranelift variable per SSA value.
//! Phis lower to block parameters with branch arguments supplied per
//! predecessor. Reflective operations lower to host API calls followed by a
//! fault check that bails out of the function, so a faulting macro returns to
//! the call site instead of trapping.

use log::debug;
use rustc_hash::FxHashMap;

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{
    types, AbiParam, InstBuilder, MemFlags, Signature, StackSlotData, StackSlotKind, Type,
    UserFuncName, Value,
};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};

use crate::ir::{BinOp, Block, CmpKind, FunctionIr, Label, Op, ReflectOp, Terminator, Ty, ValueId};

use super::code::CompiledCode;
use super::runtime;
use super::JitError;

#[inline]
fn var(v: ValueId) -> Variable {
    Variable::from_u32(v.0)
}

/// Pre-declared host API function IDs, one per reflective operation
struct HostFns {
    is_id: FuncId,
    is_lit: FuncId,
    is_ref: FuncId,
    is_list: FuncId,
    is_macro: FuncId,
    lit_create: FuncId,
    lit_size: FuncId,
    lit_get: FuncId,
    lit_set: FuncId,
    lit_push: FuncId,
    lit_pop: FuncId,
    list_create: FuncId,
    list_size: FuncId,
    list_get: FuncId,
    list_set: FuncId,
    list_push: FuncId,
    list_pop: FuncId,
    has_fault: FuncId,
}

impl HostFns {
    fn for_op(&self, op: ReflectOp) -> FuncId {
        match op {
            ReflectOp::IsId => self.is_id,
            ReflectOp::IsLit => self.is_lit,
            ReflectOp::IsRef => self.is_ref,
            ReflectOp::IsList => self.is_list,
            ReflectOp::IsMacro => self.is_macro,
            ReflectOp::LitCreate => self.lit_create,
            ReflectOp::LitSize => self.lit_size,
            ReflectOp::LitGet => self.lit_get,
            ReflectOp::LitSet => self.lit_set,
            ReflectOp::LitPush => self.lit_push,
            ReflectOp::LitPop => self.lit_pop,
            ReflectOp::ListCreate => self.list_create,
            ReflectOp::ListSize => self.list_size,
            ReflectOp::ListGet => self.list_get,
            ReflectOp::ListSet => self.list_set,
            ReflectOp::ListPush => self.list_push,
            ReflectOp::ListPop => self.list_pop,
        }
    }
}

/// JIT backend compiling one [`FunctionIr`] to native code
pub struct JitBackend {
    module: JITModule,
    host: HostFns,
}

impl JitBackend {
    pub fn new() -> Result<Self, JitError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("use_colocated_libcalls", "false")
            .map_err(|e| JitError::CompilationFailed(e.to_string()))?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| JitError::CompilationFailed(e.to_string()))?;
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| JitError::CompilationFailed(e.to_string()))?;

        let isa_builder =
            cranelift_native::builder().map_err(|e| JitError::CompilationFailed(e.to_string()))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| JitError::CompilationFailed(e.to_string()))?;

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());

        // Host API symbols for the reflective instruction family
        builder.symbol("sable_rt_is_id", runtime::sable_rt_is_id as *const u8);
        builder.symbol("sable_rt_is_lit", runtime::sable_rt_is_lit as *const u8);
        builder.symbol("sable_rt_is_ref", runtime::sable_rt_is_ref as *const u8);
        builder.symbol("sable_rt_is_list", runtime::sable_rt_is_list as *const u8);
        builder.symbol("sable_rt_is_macro", runtime::sable_rt_is_macro as *const u8);
        builder.symbol(
            "sable_rt_lit_create",
            runtime::sable_rt_lit_create as *const u8,
        );
        builder.symbol("sable_rt_lit_size", runtime::sable_rt_lit_size as *const u8);
        builder.symbol("sable_rt_lit_get", runtime::sable_rt_lit_get as *const u8);
        builder.symbol("sable_rt_lit_set", runtime::sable_rt_lit_set as *const u8);
        builder.symbol("sable_rt_lit_push", runtime::sable_rt_lit_push as *const u8);
        builder.symbol("sable_rt_lit_pop", runtime::sable_rt_lit_pop as *const u8);
        builder.symbol(
            "sable_rt_list_create",
            runtime::sable_rt_list_create as *const u8,
        );
        builder.symbol(
            "sable_rt_list_size",
            runtime::sable_rt_list_size as *const u8,
        );
        builder.symbol("sable_rt_list_get", runtime::sable_rt_list_get as *const u8);
        builder.symbol("sable_rt_list_set", runtime::sable_rt_list_set as *const u8);
        builder.symbol(
            "sable_rt_list_push",
            runtime::sable_rt_list_push as *const u8,
        );
        builder.symbol("sable_rt_list_pop", runtime::sable_rt_list_pop as *const u8);
        builder.symbol(
            "sable_rt_has_fault",
            runtime::sable_rt_has_fault as *const u8,
        );

        let mut module = JITModule::new(builder);
        let host = Self::declare_host_fns(&mut module)?;

        Ok(JitBackend { module, host })
    }

    fn declare_host_fns(module: &mut JITModule) -> Result<HostFns, JitError> {
        let sig_n = |module: &mut JITModule, params: usize| -> Signature {
            let mut sig = module.make_signature();
            for _ in 0..params {
                sig.params.push(AbiParam::new(types::I64));
            }
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        let sig0 = sig_n(module, 0);
        let sig1 = sig_n(module, 1);
        let sig2 = sig_n(module, 2);
        let sig3 = sig_n(module, 3);

        let declare =
            |module: &mut JITModule, name: &str, sig: &Signature| -> Result<FuncId, JitError> {
                module
                    .declare_function(name, Linkage::Import, sig)
                    .map_err(|e| JitError::CompilationFailed(e.to_string()))
            };

        Ok(HostFns {
            is_id: declare(module, "sable_rt_is_id", &sig1)?,
            is_lit: declare(module, "sable_rt_is_lit", &sig1)?,
            is_ref: declare(module, "sable_rt_is_ref", &sig1)?,
            is_list: declare(module, "sable_rt_is_list", &sig1)?,
            is_macro: declare(module, "sable_rt_is_macro", &sig1)?,
            lit_create: declare(module, "sable_rt_lit_create", &sig0)?,
            lit_size: declare(module, "sable_rt_lit_size", &sig1)?,
            lit_get: declare(module, "sable_rt_lit_get", &sig2)?,
            lit_set: declare(module, "sable_rt_lit_set", &sig3)?,
            lit_push: declare(module, "sable_rt_lit_push", &sig2)?,
            lit_pop: declare(module, "sable_rt_lit_pop", &sig1)?,
            list_create: declare(module, "sable_rt_list_create", &sig0)?,
            list_size: declare(module, "sable_rt_list_size", &sig1)?,
            list_get: declare(module, "sable_rt_list_get", &sig2)?,
            list_set: declare(module, "sable_rt_list_set", &sig3)?,
            list_push: declare(module, "sable_rt_list_push", &sig2)?,
            list_pop: declare(module, "sable_rt_list_pop", &sig1)?,
            has_fault: declare(module, "sable_rt_has_fault", &sig0)?,
        })
    }

    /// Compile `ir` to native code and finalize it
    pub fn compile(mut self, ir: &FunctionIr) -> Result<CompiledCode, JitError> {
        debug!(
            "jit: compiling '{}' ({} blocks, {} values)",
            ir.name,
            ir.blocks.len(),
            ir.value_types.len()
        );
        let ptr_ty = self.module.isa().pointer_type();

        let mut sig = self.module.make_signature();
        for &p in &ir.params {
            sig.params.push(AbiParam::new(clif_ty(p, ptr_ty)?));
        }
        sig.returns.push(AbiParam::new(clif_ty(ir.ret, ptr_ty)?));

        let func_id = self
            .module
            .declare_function(&format!("sable_{}", ir.name), Linkage::Local, &sig)
            .map_err(|e| JitError::CompilationFailed(e.to_string()))?;

        let mut ctx = self.module.make_context();
        ctx.func.signature = sig;
        ctx.func.name = UserFuncName::user(0, func_id.as_u32());

        self.translate(ir, &mut ctx.func, ptr_ty)?;

        self.module
            .define_function(func_id, &mut ctx)
            .map_err(|e| JitError::CompilationFailed(e.to_string()))?;
        self.module
            .finalize_definitions()
            .map_err(|e| JitError::CompilationFailed(e.to_string()))?;
        let fn_ptr = self.module.get_finalized_function(func_id);

        Ok(CompiledCode::new(fn_ptr, self.module))
    }

    fn translate(
        &mut self,
        ir: &FunctionIr,
        func: &mut cranelift_codegen::ir::Function,
        ptr_ty: Type,
    ) -> Result<(), JitError> {
        let mut builder_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(func, &mut builder_ctx);

        for (i, &ty) in ir.value_types.iter().enumerate() {
            builder.declare_var(Variable::from_u32(i as u32), clif_ty(ty, ptr_ty)?);
        }

        let mut block_map: FxHashMap<Label, cranelift_codegen::ir::Block> = FxHashMap::default();
        for block in &ir.blocks {
            block_map.insert(block.label, builder.create_block());
        }

        // Phi destinations become block parameters, in op order
        let mut phi_map: FxHashMap<Label, Vec<(ValueId, Vec<(Label, ValueId)>)>> =
            FxHashMap::default();
        for block in &ir.blocks {
            let mut phis = Vec::new();
            for spanned in &block.ops {
                if let Op::Phi { dst, ty, incomings } = &spanned.op {
                    if block.label == ir.blocks[0].label {
                        return Err(JitError::InvalidIr(
                            "phi in the entry block".to_string(),
                        ));
                    }
                    builder.append_block_param(block_map[&block.label], clif_ty(*ty, ptr_ty)?);
                    phis.push((*dst, incomings.clone()));
                }
            }
            phi_map.insert(block.label, phis);
        }

        let ret_ty = clif_ty(ir.ret, ptr_ty)?;
        let mut bail_block = None;

        for (i, block) in ir.blocks.iter().enumerate() {
            let cl_block = block_map[&block.label];
            builder.switch_to_block(cl_block);

            if i == 0 {
                // Function parameters are values 0..n by construction
                builder.append_block_params_for_function_params(cl_block);
                for (p, _) in ir.params.iter().enumerate() {
                    let val = builder.block_params(cl_block)[p];
                    builder.def_var(Variable::from_u32(p as u32), val);
                }
            } else {
                for (p, (dst, _)) in phi_map[&block.label].iter().enumerate() {
                    let val = builder.block_params(cl_block)[p];
                    builder.def_var(var(*dst), val);
                }
            }

            for spanned in &block.ops {
                self.translate_op(ir, &mut builder, &spanned.op, ptr_ty, &mut bail_block)?;
            }

            let term = block
                .terminator
                .as_ref()
                .ok_or_else(|| JitError::InvalidIr(format!("block '{}' not terminated", block.name)))?;
            translate_terminator(
                &mut builder,
                block.label,
                &term.terminator,
                &block_map,
                &phi_map,
            )?;
        }

        if let Some(bail) = bail_block {
            builder.switch_to_block(bail);
            let zero = builder.ins().iconst(ret_ty, 0);
            builder.ins().return_(&[zero]);
        }

        builder.seal_all_blocks();
        builder.finalize();
        Ok(())
    }

    fn translate_op(
        &mut self,
        ir: &FunctionIr,
        builder: &mut FunctionBuilder,
        op: &Op,
        ptr_ty: Type,
        bail_block: &mut Option<cranelift_codegen::ir::Block>,
    ) -> Result<(), JitError> {
        match op {
            Op::Const { dst, ty, bits } => {
                let cty = clif_ty(*ty, ptr_ty)?;
                let imm = sign_extend(*bits, *ty);
                let val = builder.ins().iconst(cty, imm);
                builder.def_var(var(*dst), val);
            }

            Op::Bin {
                dst,
                op,
                lhs,
                rhs,
                ..
            } => {
                let a = builder.use_var(var(*lhs));
                let b = builder.use_var(var(*rhs));
                let val = match op {
                    BinOp::Add => builder.ins().iadd(a, b),
                    BinOp::Sub => builder.ins().isub(a, b),
                    BinOp::Mul => builder.ins().imul(a, b),
                    BinOp::Sdiv => builder.ins().sdiv(a, b),
                };
                builder.def_var(var(*dst), val);
            }

            Op::Cmp {
                dst,
                kind,
                lhs,
                rhs,
                ..
            } => {
                let a = builder.use_var(var(*lhs));
                let b = builder.use_var(var(*rhs));
                let cc = match kind {
                    CmpKind::Eq => IntCC::Equal,
                    CmpKind::Ne => IntCC::NotEqual,
                    CmpKind::Lt => IntCC::SignedLessThan,
                    CmpKind::Le => IntCC::SignedLessThanOrEqual,
                    CmpKind::Gt => IntCC::SignedGreaterThan,
                    CmpKind::Ge => IntCC::SignedGreaterThanOrEqual,
                };
                let val = builder.ins().icmp(cc, a, b);
                builder.def_var(var(*dst), val);
            }

            Op::Alloc { dst, ty } => {
                let bytes = clif_ty(*ty, ptr_ty)?.bytes();
                let slot = builder.create_sized_stack_slot(StackSlotData::new(
                    StackSlotKind::ExplicitSlot,
                    bytes,
                    bytes.trailing_zeros() as u8,
                ));
                let addr = builder.ins().stack_addr(ptr_ty, slot, 0);
                builder.def_var(var(*dst), addr);
            }

            Op::Load { dst, ty, ptr } => {
                let addr = builder.use_var(var(*ptr));
                let val = builder
                    .ins()
                    .load(clif_ty(*ty, ptr_ty)?, MemFlags::trusted(), addr, 0);
                builder.def_var(var(*dst), val);
            }

            Op::Store { value, ptr, .. } => {
                let val = builder.use_var(var(*value));
                let addr = builder.use_var(var(*ptr));
                builder.ins().store(MemFlags::trusted(), val, addr, 0);
            }

            // Lowered to block parameters; nothing to emit here
            Op::Phi { .. } => {}

            Op::Reflect { dst, op, args } => {
                let func_id = self.host.for_op(*op);
                let func_ref = self.module.declare_func_in_func(func_id, builder.func);
                let vals: Vec<Value> = args.iter().map(|a| builder.use_var(var(*a))).collect();
                let call = builder.ins().call(func_ref, &vals);
                let result = builder.inst_results(call)[0];
                if let Some(dst) = dst {
                    let want = clif_ty(ir.value_ty(*dst), ptr_ty)?;
                    let val = if want == types::I64 {
                        result
                    } else {
                        builder.ins().ireduce(want, result)
                    };
                    builder.def_var(var(*dst), val);
                }

                // Bail out of the macro as soon as a host call faults; the
                // call site inspects the context and reports the fault.
                let fault_ref = self
                    .module
                    .declare_func_in_func(self.host.has_fault, builder.func);
                let check = builder.ins().call(fault_ref, &[]);
                let flag = builder.inst_results(check)[0];
                let bail = *bail_block.get_or_insert_with(|| builder.create_block());
                let cont = builder.create_block();
                builder.ins().brif(flag, bail, &[], cont, &[]);
                builder.switch_to_block(cont);
            }
        }
        Ok(())
    }
}

fn translate_terminator(
    builder: &mut FunctionBuilder,
    current: Label,
    term: &Terminator,
    block_map: &FxHashMap<Label, cranelift_codegen::ir::Block>,
    phi_map: &FxHashMap<Label, Vec<(ValueId, Vec<(Label, ValueId)>)>>,
) -> Result<(), JitError> {
    match term {
        Terminator::Return { value } => {
            let val = builder.use_var(var(*value));
            builder.ins().return_(&[val]);
        }
        Terminator::Jump { target } => {
            let block = resolve_target(*target, block_map)?;
            let args = branch_args(builder, current, *target, phi_map)?;
            builder.ins().jump(block, &args);
        }
        Terminator::CondBranch {
            cond,
            then_target,
            else_target,
        } => {
            let cond_val = builder.use_var(var(*cond));
            let then_block = resolve_target(*then_target, block_map)?;
            let else_block = resolve_target(*else_target, block_map)?;
            let then_args = branch_args(builder, current, *then_target, phi_map)?;
            let else_args = branch_args(builder, current, *else_target, phi_map)?;
            builder
                .ins()
                .brif(cond_val, then_block, &then_args, else_block, &else_args);
        }
    }
    Ok(())
}

fn resolve_target(
    target: Label,
    block_map: &FxHashMap<Label, cranelift_codegen::ir::Block>,
) -> Result<cranelift_codegen::ir::Block, JitError> {
    if target == Label::PENDING {
        return Err(JitError::InvalidIr("unresolved branch target".to_string()));
    }
    block_map
        .get(&target)
        .copied()
        .ok_or_else(|| JitError::InvalidIr(format!("unknown branch target {:?}", target)))
}

/// Arguments for a jump into `target`: one value per phi, picked by the
/// predecessor making the jump. The deferred-edge pass guarantees coverage.
fn branch_args(
    builder: &mut FunctionBuilder,
    current: Label,
    target: Label,
    phi_map: &FxHashMap<Label, Vec<(ValueId, Vec<(Label, ValueId)>)>>,
) -> Result<Vec<Value>, JitError> {
    let phis = match phi_map.get(&target) {
        Some(phis) => phis,
        None => return Ok(Vec::new()),
    };
    phis.iter()
        .map(|(dst, incomings)| {
            incomings
                .iter()
                .find(|(pred, _)| *pred == current)
                .map(|(_, value)| builder.use_var(var(*value)))
                .ok_or_else(|| {
                    JitError::InvalidIr(format!(
                        "phi {:?} has no incoming for predecessor {:?}",
                        dst, current
                    ))
                })
        })
        .collect()
}

fn clif_ty(ty: Ty, ptr_ty: Type) -> Result<Type, JitError> {
    match ty {
        Ty::Int(1) | Ty::Int(8) => Ok(types::I8),
        Ty::Int(16) => Ok(types::I16),
        Ty::Int(32) => Ok(types::I32),
        Ty::Int(64) => Ok(types::I64),
        Ty::Int(w) => Err(JitError::UnsupportedWidth(w)),
        Ty::Ptr => Ok(ptr_ty),
    }
}

/// Sign-extend width-masked constant bits into the iconst immediate.
/// Width 1 stays 0 or 1 so literals agree with icmp results.
fn sign_extend(bits: u64, ty: Ty) -> i64 {
    match ty {
        Ty::Int(1) => (bits & 1) as i64,
        Ty::Int(w) if w < 64 => {
            let shift = 64 - w as u32;
            ((bits << shift) as i64) >> shift
        }
        _ => bits as i64,
    }
}
