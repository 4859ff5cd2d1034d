//! [`ZoneSpec`] — the user-supplied configuration record (spec.md §3) — and
//! the shared context every one of the eight hooks dispatches through.

use crate::delegate::Delegate;
use crate::errors::ZoneCallbackError;
use crate::task::{Task, TaskKind};
use crate::zone::Zone;
use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;
use typed_builder::TypedBuilder;

/// A type-erased callback result, used only by [`OnInterceptHook`] /
/// [`OnInvokeHook`] — the two hooks that wrap an arbitrary user callback
/// (spec.md's `cb` parameter, dynamically typed in the source this crate is
/// modeled on). [`crate::zone::Zone::run`] erases its generic `T` into this
/// on the way in and downcasts back on the way out; see DESIGN.md for why
/// this is the faithful translation rather than making every hook generic.
pub type AnyResult = Result<Box<dyn Any>, ZoneCallbackError>;

/// A type-erased, once-callable user callback.
pub type ErasedFn = Box<dyn FnOnce() -> AnyResult>;

/// The `{microTask, macroTask, eventTask, change}` snapshot `onHasTask`
/// receives (spec.md §4.C3 "Per-delegate task counter").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HasTaskState {
    pub micro_task: bool,
    pub macro_task: bool,
    pub event_task: bool,
    pub change: TaskKind,
}

/// The context every hook dispatch carries: the delegate to forward to if
/// the hook wants to continue the chain (`delegateH` in spec.md §3), the
/// zone whose spec actually defines the hook (`currZoneH`), and the zone
/// the user originally invoked the operation on (`targetZone`).
///
/// A hook that wants the default/ancestor behavior calls back into
/// `ctx.parent` explicitly — exactly as a `ZoneSpec.onInvoke` in the source
/// this is modeled on calls `parentZoneDelegate.invoke(...)` to continue
/// past itself.
#[derive(Clone)]
pub struct HookCtx {
    pub parent: Option<Rc<Delegate>>,
    pub curr_zone: Zone,
    pub target: Zone,
}

pub type OnForkHook = Rc<dyn Fn(&HookCtx, &ZoneSpec) -> Zone>;
pub type OnInterceptHook = Rc<dyn Fn(&HookCtx, ErasedFn, &str) -> ErasedFn>;
pub type OnInvokeHook = Rc<dyn Fn(&HookCtx, ErasedFn, &str) -> AnyResult>;
pub type OnHandleErrorHook = Rc<dyn Fn(&HookCtx, &ZoneCallbackError) -> bool>;
pub type OnScheduleTaskHook = Rc<dyn Fn(&HookCtx, Rc<Task>) -> Result<Rc<Task>, ZoneCallbackError>>;
pub type OnInvokeTaskHook = Rc<dyn Fn(&HookCtx, Rc<Task>) -> Result<(), ZoneCallbackError>>;
pub type OnCancelTaskHook = Rc<dyn Fn(&HookCtx, Rc<Task>) -> Result<(), ZoneCallbackError>>;
pub type OnHasTaskHook = Rc<dyn Fn(&HookCtx, HasTaskState) -> Result<(), ZoneCallbackError>>;

/// The user-supplied configuration used to [`fork`](crate::zone::Zone::fork)
/// a child zone (spec.md §3 "ZoneSpec").
///
/// Consumed once during [`Delegate`] construction; the core never mutates a
/// `ZoneSpec` after that point, matching spec.md's "never mutated thereafter
/// by the core".
///
/// # Constructor(s)
/// Built via [`ZoneSpec::builder`], in the same `typed-builder` idiom
/// `chronographer_core::task::TaskConfig` uses for its own optional,
/// defaulted fields.
#[derive(TypedBuilder)]
#[builder(build_method(into = Rc<ZoneSpec>))]
pub struct ZoneSpecConfig {
    name: String,

    #[builder(default)]
    properties: HashMap<String, Rc<dyn Any>>,

    #[builder(default, setter(strip_option))]
    on_fork: Option<OnForkHook>,

    #[builder(default, setter(strip_option))]
    on_intercept: Option<OnInterceptHook>,

    #[builder(default, setter(strip_option))]
    on_invoke: Option<OnInvokeHook>,

    #[builder(default, setter(strip_option))]
    on_handle_error: Option<OnHandleErrorHook>,

    #[builder(default, setter(strip_option))]
    on_schedule_task: Option<OnScheduleTaskHook>,

    #[builder(default, setter(strip_option))]
    on_invoke_task: Option<OnInvokeTaskHook>,

    #[builder(default, setter(strip_option))]
    on_cancel_task: Option<OnCancelTaskHook>,

    #[builder(default, setter(strip_option))]
    on_has_task: Option<OnHasTaskHook>,
}

impl From<ZoneSpecConfig> for Rc<ZoneSpec> {
    fn from(config: ZoneSpecConfig) -> Self {
        Rc::new(ZoneSpec {
            name: config.name,
            properties: config.properties,
            on_fork: config.on_fork,
            on_intercept: config.on_intercept,
            on_invoke: config.on_invoke,
            on_handle_error: config.on_handle_error,
            on_schedule_task: config.on_schedule_task,
            on_invoke_task: config.on_invoke_task,
            on_cancel_task: config.on_cancel_task,
            on_has_task: config.on_has_task,
        })
    }
}

pub struct ZoneSpec {
    pub(crate) name: String,
    pub(crate) properties: HashMap<String, Rc<dyn Any>>,
    pub(crate) on_fork: Option<OnForkHook>,
    pub(crate) on_intercept: Option<OnInterceptHook>,
    pub(crate) on_invoke: Option<OnInvokeHook>,
    pub(crate) on_handle_error: Option<OnHandleErrorHook>,
    pub(crate) on_schedule_task: Option<OnScheduleTaskHook>,
    pub(crate) on_invoke_task: Option<OnInvokeTaskHook>,
    pub(crate) on_cancel_task: Option<OnCancelTaskHook>,
    pub(crate) on_has_task: Option<OnHasTaskHook>,
}

impl ZoneSpec {
    pub fn builder() -> ZoneSpecConfigBuilder {
        ZoneSpecConfig::builder()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
