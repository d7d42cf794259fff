//! ArrayBuffers, SharedArrayBuffers, typed arrays and data views.
//!
//! Owned buffers are allocated by the embedding layer and handed to the
//! engine with a finalizer that returns them to the allocator. External
//! buffers wrap host bytes and run a host finalizer instead. Backing
//! stores are reference-counted views over a buffer's bytes that keep the
//! owning buffer value alive until the last release. Shared buffers carry
//! an atomically reference-counted header so the engine's shared-buffer
//! hooks can hand payloads between agents.

use std::{
    alloc::{alloc, alloc_zeroed, dealloc, Layout},
    os::raw::c_void,
    sync::atomic::{AtomicI32, Ordering},
};

use crate::{
    env::{env_from_runtime, Env},
    error::Result,
    finalizer::{FinalizeCallback, FinalizerRecord},
    handle::Value,
    sys,
};

/// Element kinds of typed arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedArrayType {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float16,
    Float32,
    Float64,
    BigInt64,
    BigUint64,
}

impl TypedArrayType {
    fn constructor(self) -> &'static str {
        match self {
            TypedArrayType::Int8 => "Int8Array",
            TypedArrayType::Uint8 => "Uint8Array",
            TypedArrayType::Uint8Clamped => "Uint8ClampedArray",
            TypedArrayType::Int16 => "Int16Array",
            TypedArrayType::Uint16 => "Uint16Array",
            TypedArrayType::Int32 => "Int32Array",
            TypedArrayType::Uint32 => "Uint32Array",
            TypedArrayType::Float16 => "Float16Array",
            TypedArrayType::Float32 => "Float32Array",
            TypedArrayType::Float64 => "Float64Array",
            TypedArrayType::BigInt64 => "BigInt64Array",
            TypedArrayType::BigUint64 => "BigUint64Array",
        }
    }
}

/// Brands checked when recovering a typed array's element type. Matches
/// the creation set minus `Float16Array`.
const TYPED_ARRAY_BRANDS: [(&str, TypedArrayType); 11] = [
    ("Int8Array", TypedArrayType::Int8),
    ("Uint8Array", TypedArrayType::Uint8),
    ("Uint8ClampedArray", TypedArrayType::Uint8Clamped),
    ("Int16Array", TypedArrayType::Int16),
    ("Uint16Array", TypedArrayType::Uint16),
    ("Int32Array", TypedArrayType::Int32),
    ("Uint32Array", TypedArrayType::Uint32),
    ("Float32Array", TypedArrayType::Float32),
    ("Float64Array", TypedArrayType::Float64),
    ("BigInt64Array", TypedArrayType::BigInt64),
    ("BigUint64Array", TypedArrayType::BigUint64),
];

/// A reference-counted view over an ArrayBuffer's bytes. Holds the owning
/// buffer value alive until the last release.
pub struct BackingStore {
    inner: *mut BackingStoreInner,
}

pub(crate) struct BackingStoreInner {
    references: AtomicI32,
    len: usize,
    data: *mut u8,
    /// Keeps the underlying buffer value uncollected; `null` for shared
    /// buffers whose payload is independently counted.
    owner: sys::JSValue,
}

impl BackingStore {
    pub fn data(&self) -> *mut u8 {
        unsafe { (*self.inner).data }
    }

    pub fn len(&self) -> usize {
        unsafe { (*self.inner).len }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Header preceding every shared-buffer payload. The engine's shared hooks
/// balance the count as payloads transfer between agents.
#[repr(C)]
struct SharedHeader {
    references: AtomicI32,
    len: usize,
}

unsafe fn shared_layout(len: usize) -> Layout {
    Layout::from_size_align_unchecked(
        std::mem::size_of::<SharedHeader>() + len,
        std::mem::align_of::<SharedHeader>(),
    )
}

unsafe fn shared_alloc(len: usize, references: i32, zero: bool) -> *mut u8 {
    let layout = shared_layout(len);

    let base = if zero {
        alloc_zeroed(layout)
    } else {
        alloc(layout)
    };

    let header = base as *mut SharedHeader;

    (*header).references = AtomicI32::new(references);
    (*header).len = len;

    base.add(std::mem::size_of::<SharedHeader>())
}

unsafe fn shared_header(data: *mut c_void) -> *mut SharedHeader {
    (data as *mut u8).sub(std::mem::size_of::<SharedHeader>()) as *mut SharedHeader
}

pub(crate) unsafe extern "C" fn on_shared_alloc(_opaque: *mut c_void, size: usize) -> *mut c_void {
    shared_alloc(size, 1, false) as *mut c_void
}

pub(crate) unsafe extern "C" fn on_shared_free(_opaque: *mut c_void, ptr: *mut c_void) {
    let header = shared_header(ptr);

    if (*header).references.fetch_sub(1, Ordering::SeqCst) == 1 {
        dealloc(header as *mut u8, shared_layout((*header).len));
    }
}

pub(crate) unsafe extern "C" fn on_shared_dup(_opaque: *mut c_void, ptr: *mut c_void) {
    let header = shared_header(ptr);

    (*header).references.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn on_arraybuffer_finalize(
    _rt: *mut sys::JSRuntime,
    opaque: *mut c_void,
    ptr: *mut c_void,
) {
    if ptr.is_null() {
        return;
    }

    dealloc(
        ptr as *mut u8,
        Layout::from_size_align_unchecked(opaque as usize, 1),
    );
}

unsafe extern "C" fn on_external_arraybuffer_finalize(
    rt: *mut sys::JSRuntime,
    opaque: *mut c_void,
    ptr: *mut c_void,
) {
    if ptr.is_null() {
        return;
    }

    let env = env_from_runtime(rt);

    let record = Box::from_raw(opaque as *mut FinalizerRecord);

    if let Some(cb) = record.cb {
        cb(env, record.data, record.hint);
    }
}

unsafe extern "C" fn on_backed_arraybuffer_finalize(
    rt: *mut sys::JSRuntime,
    opaque: *mut c_void,
    _ptr: *mut c_void,
) {
    let inner = opaque as *mut BackingStoreInner;

    if (*inner).references.fetch_sub(1, Ordering::SeqCst) == 1 {
        sys::free_value_rt(rt, (*inner).owner);

        drop(Box::from_raw(inner));
    }
}

impl Env {
    fn alloc_arraybuffer(&self, len: usize, zero: bool) -> Result<(Value, *mut u8)> {
        self.check_no_pending()?;

        if len > u32::MAX as usize {
            self.throw_range_error(None, "Array buffer allocation failed")?;

            return Err(self.status());
        }

        let size = len.max(1);

        let bytes = unsafe {
            let layout = Layout::from_size_align_unchecked(size, 1);

            if zero {
                alloc_zeroed(layout)
            } else {
                alloc(layout)
            }
        };

        if bytes.is_null() {
            self.throw_range_error(None, "Array buffer allocation failed")?;

            return Err(self.status());
        }

        let arraybuffer = unsafe {
            sys::JS_NewArrayBuffer(
                self.context,
                bytes,
                len,
                Some(on_arraybuffer_finalize),
                size as *mut c_void,
                false,
            )
        };

        Ok((self.root(arraybuffer), bytes))
    }

    /// Creates an ArrayBuffer of `len` zeroed bytes, returning the buffer
    /// and its bytes.
    pub fn create_arraybuffer(&self, len: usize) -> Result<(Value, *mut u8)> {
        self.alloc_arraybuffer(len, true)
    }

    /// Like [`Env::create_arraybuffer`] with uninitialised contents.
    pub fn create_unsafe_arraybuffer(&self, len: usize) -> Result<(Value, *mut u8)> {
        self.alloc_arraybuffer(len, false)
    }

    /// Wraps `len` host-owned bytes at `data`; `cb` runs when the buffer
    /// is collected.
    pub fn create_external_arraybuffer(
        &self,
        data: *mut u8,
        len: usize,
        cb: Option<FinalizeCallback>,
        hint: *mut c_void,
    ) -> Result<Value> {
        self.check_no_pending()?;

        let record = Box::into_raw(Box::new(FinalizerRecord {
            data: data as *mut c_void,
            cb,
            hint,
        }));

        let arraybuffer = unsafe {
            sys::JS_NewArrayBuffer(
                self.context,
                data,
                len,
                Some(on_external_arraybuffer_finalize),
                record as *mut c_void,
                false,
            )
        };

        Ok(self.root(arraybuffer))
    }

    /// Creates an ArrayBuffer sharing the bytes of `backing_store`,
    /// retaining one store reference for the buffer's lifetime.
    pub fn create_arraybuffer_with_backing_store(
        &self,
        backing_store: &BackingStore,
    ) -> Result<(Value, *mut u8, usize)> {
        self.check_no_pending()?;

        let (data, len) = unsafe {
            (*backing_store.inner)
                .references
                .fetch_add(1, Ordering::SeqCst);

            ((*backing_store.inner).data, (*backing_store.inner).len)
        };

        let arraybuffer = unsafe {
            sys::JS_NewArrayBuffer(
                self.context,
                data,
                len,
                Some(on_backed_arraybuffer_finalize),
                backing_store.inner as *mut c_void,
                false,
            )
        };

        Ok((self.root(arraybuffer), data, len))
    }

    /// Detaches `arraybuffer` from its bytes.
    pub fn detach_arraybuffer(&self, arraybuffer: &Value) {
        unsafe { sys::JS_DetachArrayBuffer(self.context, arraybuffer.raw()) };
    }

    /// The bytes and length of `arraybuffer`.
    pub fn get_arraybuffer_info(&self, arraybuffer: &Value) -> (*mut u8, usize) {
        let mut len = 0;

        let data = unsafe { sys::JS_GetArrayBuffer(self.context, &mut len, arraybuffer.raw()) };

        (data, len)
    }

    /// A new backing store (one reference) over `arraybuffer`'s bytes,
    /// retaining the buffer as owner.
    pub fn get_arraybuffer_backing_store(&self, arraybuffer: &Value) -> BackingStore {
        let mut len = 0;

        let data = unsafe { sys::JS_GetArrayBuffer(self.context, &mut len, arraybuffer.raw()) };

        let owner = unsafe { sys::dup(self.context, arraybuffer.raw()) };

        BackingStore {
            inner: Box::into_raw(Box::new(BackingStoreInner {
                references: AtomicI32::new(1),
                len,
                data,
                owner,
            })),
        }
    }

    /// Drops one reference; the last release frees the owner reference and
    /// the store itself.
    pub fn release_arraybuffer_backing_store(&self, backing_store: BackingStore) {
        unsafe {
            if (*backing_store.inner)
                .references
                .fetch_sub(1, Ordering::SeqCst)
                == 1
            {
                sys::free_value(self.context, (*backing_store.inner).owner);

                drop(Box::from_raw(backing_store.inner));
            }
        }
    }

    fn alloc_sharedarraybuffer(&self, len: usize, zero: bool) -> Result<(Value, *mut u8)> {
        self.check_no_pending()?;

        // The payload starts uncounted: agents that receive the buffer
        // balance their own dup/free pairs, and a count of zero keeps the
        // payload alive for the host.
        let data = unsafe { shared_alloc(len, 0, zero) };

        let sharedarraybuffer =
            unsafe { sys::JS_NewArrayBuffer(self.context, data, len, None, std::ptr::null_mut(), true) };

        Ok((self.root(sharedarraybuffer), data))
    }

    /// Creates a SharedArrayBuffer of `len` zeroed bytes.
    pub fn create_sharedarraybuffer(&self, len: usize) -> Result<(Value, *mut u8)> {
        self.alloc_sharedarraybuffer(len, true)
    }

    /// Like [`Env::create_sharedarraybuffer`] with uninitialised contents.
    pub fn create_unsafe_sharedarraybuffer(&self, len: usize) -> Result<(Value, *mut u8)> {
        self.alloc_sharedarraybuffer(len, false)
    }

    /// Creates a SharedArrayBuffer over the bytes of `backing_store`.
    pub fn create_sharedarraybuffer_with_backing_store(
        &self,
        backing_store: &BackingStore,
    ) -> Result<(Value, *mut u8, usize)> {
        self.check_no_pending()?;

        let (data, len) = unsafe { ((*backing_store.inner).data, (*backing_store.inner).len) };

        let sharedarraybuffer =
            unsafe { sys::JS_NewArrayBuffer(self.context, data, len, None, std::ptr::null_mut(), true) };

        Ok((self.root(sharedarraybuffer), data, len))
    }

    /// The bytes and length of `sharedarraybuffer`.
    pub fn get_sharedarraybuffer_info(&self, sharedarraybuffer: &Value) -> (*mut u8, usize) {
        self.get_arraybuffer_info(sharedarraybuffer)
    }

    /// A new backing store over a shared buffer's bytes. Shared payloads
    /// are independently counted, so the store carries no owner.
    pub fn get_sharedarraybuffer_backing_store(&self, sharedarraybuffer: &Value) -> BackingStore {
        let mut len = 0;

        let data =
            unsafe { sys::JS_GetArrayBuffer(self.context, &mut len, sharedarraybuffer.raw()) };

        BackingStore {
            inner: Box::into_raw(Box::new(BackingStoreInner {
                references: AtomicI32::new(1),
                len,
                data,
                owner: sys::null(),
            })),
        }
    }

    /// Constructs a typed array of `len` elements viewing `arraybuffer`
    /// from `offset`.
    pub fn create_typedarray(
        &self,
        element_type: TypedArrayType,
        len: usize,
        arraybuffer: &Value,
        offset: usize,
    ) -> Result<Value> {
        self.check_no_pending()?;

        self.construct_view(element_type.constructor(), len, arraybuffer, offset)
    }

    /// Constructs a DataView of `len` bytes over `arraybuffer` from
    /// `offset`.
    pub fn create_dataview(
        &self,
        len: usize,
        arraybuffer: &Value,
        offset: usize,
    ) -> Result<Value> {
        self.check_no_pending()?;

        self.construct_view("DataView", len, arraybuffer, offset)
    }

    fn construct_view(
        &self,
        constructor: &str,
        len: usize,
        arraybuffer: &Value,
        offset: usize,
    ) -> Result<Value> {
        let view = unsafe {
            let global = sys::JS_GetGlobalObject(self.context);
            let atom = sys::Atom::new(self.context, constructor);
            let ctor = sys::JS_GetProperty(self.context, global, atom.raw());

            let mut argv = [
                arraybuffer.raw(),
                sys::new_int64(offset as i64),
                sys::new_int64(len as i64),
            ];

            let view = sys::JS_CallConstructor(self.context, ctor, 3, argv.as_mut_ptr());

            sys::free_value(self.context, ctor);
            sys::free_value(self.context, global);

            view
        };

        if sys::is_exception(view) {
            return Err(self.status());
        }

        Ok(self.root(view))
    }

    /// Recovers a typed array's element type, bytes, logical length,
    /// buffer and byte offset.
    pub fn get_typedarray_info(&self, typedarray: &Value) -> Result<TypedArrayInfo> {
        let mut offset = 0;
        let mut byte_len = 0;
        let mut bytes_per_element = 0;

        let arraybuffer = unsafe {
            sys::JS_GetTypedArrayBuffer(
                self.context,
                typedarray.raw(),
                &mut offset,
                &mut byte_len,
                &mut bytes_per_element,
            )
        };

        if sys::is_exception(arraybuffer) {
            return Err(self.status());
        }

        let element_type = TYPED_ARRAY_BRANDS
            .iter()
            .find(|(brand, _)| self.instance_of_global(typedarray.raw(), brand))
            .map(|(_, element_type)| *element_type);

        let data = unsafe {
            let mut size = 0;

            sys::JS_GetArrayBuffer(self.context, &mut size, arraybuffer).add(offset)
        };

        Ok(TypedArrayInfo {
            element_type,
            data,
            len: byte_len / bytes_per_element.max(1),
            offset,
            arraybuffer: self.root(arraybuffer),
        })
    }

    /// Recovers a DataView's bytes, byte length, buffer and byte offset.
    pub fn get_dataview_info(&self, dataview: &Value) -> Result<DataViewInfo> {
        unsafe {
            let offset = {
                let value = sys::JS_GetPropertyStr(self.context, dataview.raw(), c"byteOffset".as_ptr());

                let mut offset = 0i64;
                sys::JS_ToInt64(self.context, &mut offset, value);

                sys::free_value(self.context, value);

                offset as usize
            };

            let len = {
                let value = sys::JS_GetPropertyStr(self.context, dataview.raw(), c"byteLength".as_ptr());

                let mut len = 0i64;
                sys::JS_ToInt64(self.context, &mut len, value);

                sys::free_value(self.context, value);

                len as usize
            };

            let arraybuffer = sys::JS_GetPropertyStr(self.context, dataview.raw(), c"buffer".as_ptr());

            if sys::is_exception(arraybuffer) {
                return Err(self.status());
            }

            let data = {
                let mut size = 0;

                sys::JS_GetArrayBuffer(self.context, &mut size, arraybuffer).add(offset)
            };

            Ok(DataViewInfo {
                data,
                len,
                offset,
                arraybuffer: self.root(arraybuffer),
            })
        }
    }

    /// Borrows a typed array's element type, bytes and logical length.
    /// Release with [`Env::release_typedarray_view`].
    pub fn get_typedarray_view(
        &self,
        typedarray: &Value,
    ) -> Result<(Option<TypedArrayType>, *mut u8, usize, TypedArrayView)> {
        let info = self.get_typedarray_info(typedarray)?;

        Ok((info.element_type, info.data, info.len, TypedArrayView(())))
    }

    pub fn release_typedarray_view(&self, _view: TypedArrayView) {}

    /// Borrows a DataView's bytes and byte length. Release with
    /// [`Env::release_dataview_view`].
    pub fn get_dataview_view(&self, dataview: &Value) -> Result<(*mut u8, usize, DataViewView)> {
        let info = self.get_dataview_info(dataview)?;

        Ok((info.data, info.len, DataViewView(())))
    }

    pub fn release_dataview_view(&self, _view: DataViewView) {}
}

/// What [`Env::get_typedarray_info`] recovers. `element_type` is `None`
/// for brands this backend cannot distinguish (`Float16Array`).
pub struct TypedArrayInfo {
    pub element_type: Option<TypedArrayType>,
    pub data: *mut u8,
    /// Logical length in elements.
    pub len: usize,
    pub offset: usize,
    pub arraybuffer: Value,
}

pub struct DataViewInfo {
    pub data: *mut u8,
    /// Length in bytes.
    pub len: usize,
    pub offset: usize,
    pub arraybuffer: Value,
}

/// Token pairing a typed-array view acquisition with its release.
pub struct TypedArrayView(());

/// Token pairing a data-view acquisition with its release.
pub struct DataViewView(());
