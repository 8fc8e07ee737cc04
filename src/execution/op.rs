use super::error::Error;
use super::value::{StackAccess as _, Value};
use anyhow::{bail, Result};

macro_rules! binop {
    ($($name: ident: $ty: ty => |$l: ident, $r: ident| $body: expr;)*) => {
        $(
            pub fn $name(stack: &mut Vec<Value>) -> Result<()> {
                let ($r, $l): ($ty, $ty) = stack.pop_rl()?;
                stack.push(Value::from($body));
                Ok(())
            }
        )*
    };
}

macro_rules! unop {
    ($($name: ident: $ty: ty => |$v: ident| $body: expr;)*) => {
        $(
            pub fn $name(stack: &mut Vec<Value>) -> Result<()> {
                let $v: $ty = stack.pop1()?;
                stack.push(Value::from($body));
                Ok(())
            }
        )*
    };
}

binop! {
    i32_add: i32 => |l, r| l.wrapping_add(r);
    i32_sub: i32 => |l, r| l.wrapping_sub(r);
    i32_mul: i32 => |l, r| l.wrapping_mul(r);
    i32_and: i32 => |l, r| l & r;
    i32_or: i32 => |l, r| l | r;
    i32_xor: i32 => |l, r| l ^ r;
    i32_shl: i32 => |l, r| l.wrapping_shl(r as u32);
    i32_shr_s: i32 => |l, r| l.wrapping_shr(r as u32);
    i32_shr_u: i32 => |l, r| (l as u32).wrapping_shr(r as u32) as i32;
    i32_rotl: i32 => |l, r| l.rotate_left(r as u32);
    i32_rotr: i32 => |l, r| l.rotate_right(r as u32);
    i32_eq: i32 => |l, r| l == r;
    i32_ne: i32 => |l, r| l != r;
    i32_lt_s: i32 => |l, r| l < r;
    i32_lt_u: i32 => |l, r| (l as u32) < (r as u32);
    i32_gt_s: i32 => |l, r| l > r;
    i32_gt_u: i32 => |l, r| (l as u32) > (r as u32);
    i32_le_s: i32 => |l, r| l <= r;
    i32_le_u: i32 => |l, r| (l as u32) <= (r as u32);
    i32_ge_s: i32 => |l, r| l >= r;
    i32_ge_u: i32 => |l, r| (l as u32) >= (r as u32);
    i64_add: i64 => |l, r| l.wrapping_add(r);
    i64_sub: i64 => |l, r| l.wrapping_sub(r);
    i64_mul: i64 => |l, r| l.wrapping_mul(r);
    i64_eq: i64 => |l, r| l == r;
    i64_ne: i64 => |l, r| l != r;
}

unop! {
    i32_eqz: i32 => |v| v == 0;
    i32_clz: i32 => |v| v.leading_zeros() as i32;
    i32_ctz: i32 => |v| v.trailing_zeros() as i32;
    i32_popcnt: i32 => |v| v.count_ones() as i32;
    i64_eqz: i64 => |v| v == 0;
    i32_wrap_i64: i64 => |v| v as i32;
    i64_extend_i32_s: i32 => |v| v as i64;
    i64_extend_i32_u: i32 => |v| v as u32 as i64;
}

pub fn i32_div_s(stack: &mut Vec<Value>) -> Result<()> {
    let (r, l): (i32, i32) = stack.pop_rl()?;
    if r == 0 {
        bail!(Error::IntegerDivideByZero);
    }
    if l == i32::MIN && r == -1 {
        bail!(Error::IntegerOverflow);
    }
    stack.push((l / r).into());
    Ok(())
}

pub fn i32_div_u(stack: &mut Vec<Value>) -> Result<()> {
    let (r, l): (i32, i32) = stack.pop_rl()?;
    if r == 0 {
        bail!(Error::IntegerDivideByZero);
    }
    stack.push(((l as u32 / r as u32) as i32).into());
    Ok(())
}

pub fn i32_rem_s(stack: &mut Vec<Value>) -> Result<()> {
    let (r, l): (i32, i32) = stack.pop_rl()?;
    if r == 0 {
        bail!(Error::IntegerDivideByZero);
    }
    stack.push(l.wrapping_rem(r).into());
    Ok(())
}

pub fn i32_rem_u(stack: &mut Vec<Value>) -> Result<()> {
    let (r, l): (i32, i32) = stack.pop_rl()?;
    if r == 0 {
        bail!(Error::IntegerDivideByZero);
    }
    stack.push(((l as u32 % r as u32) as i32).into());
    Ok(())
}

pub fn select(stack: &mut Vec<Value>) -> Result<()> {
    let cond: i32 = stack.pop1()?;
    let val2 = stack.pop_value()?;
    let val1 = stack.pop_value()?;
    stack.push(if cond != 0 { val1 } else { val2 });
    Ok(())
}
