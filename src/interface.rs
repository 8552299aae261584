// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Declarative operator wiring.
//!
//! [`graph_interface!`] turns a declarative field list into a typed IO
//! struct: `resolve` performs the `setup`-phase lookups and type
//! declarations, the fields carry the resolved handles, and each dependency
//! field gets a same-named accessor materializing a typed view at process
//! time. Operators store the resolved struct in the vertex context during
//! `setup` and read it back in `process`.
//!
//! Field forms, mirroring the wiring tuple
//! `(direction, name, type, modifier?)`:
//!
//! * `(depend, name, Ty)` - required value input (essential level 2)
//! * `(depend, name, Ty, mutable)` - required mutable value input
//! * `(depend, name, Ty, optional)` - input that may be empty (level 0)
//! * `(depend, name, Ty, skip_if_empty)` - empty input skips the vertex
//!   (level 1)
//! * `(emit, name, Ty)` - typed output
//!
//! ```ignore
//! graph_interface! {
//!     pub struct AdderIo {
//!         (depend, lhs, f64),
//!         (depend, rhs, f64),
//!         (emit, sum, f64),
//!     }
//! }
//!
//! // in Operator::setup
//! let io = AdderIo::resolve(vertex)?;
//! vertex.init_context(io);
//!
//! // in Operator::process
//! let io = vertex.context::<AdderIo>()?;
//! let sum = *io.lhs()? + *io.rhs()?;
//! io.sum.emit().set(sum);
//! ```

/// Generates a typed IO struct from a declarative wiring list. See the
/// module documentation for the accepted field forms.
#[macro_export]
macro_rules! graph_interface {
    ($vis:vis struct $name:ident { $($fields:tt)* }) => {
        $crate::graph_interface!(@munch $vis $name vertex;
            decl = {}; init = {}; body = {}; methods = {};
            rest = { $($fields)* }
        );
    };

    (@munch $vis:vis $name:ident $vertex:ident;
        decl = {$($decl:tt)*}; init = {$($init:tt)*}; body = {$($body:tt)*}; methods = {$($methods:tt)*};
        rest = { (depend, $fname:ident, $fty:ty) $(, $($rest:tt)*)? }
    ) => {
        $crate::graph_interface!(@munch $vis $name $vertex;
            decl = {$($decl)*
                pub $fname: ::std::sync::Arc<$crate::engine::dependency::Dependency>,
            };
            init = {$($init)* $fname,};
            body = {$($body)*
                let $fname = match $vertex.named_dependency(stringify!($fname)) {
                    ::std::option::Option::Some(dependency) => dependency,
                    ::std::option::Option::None => return ::std::result::Result::Err(-1),
                };
                $fname.declare_essential($crate::engine::dependency::EssentialLevel::Required);
                if !$fname.declare_type::<$fty>() {
                    return ::std::result::Result::Err(-1);
                }
            };
            methods = {$($methods)*
                pub fn $fname(&self) -> ::std::option::Option<$crate::engine::value::ValueRef<$fty>> {
                    self.$fname.value::<$fty>()
                }
            };
            rest = { $($($rest)*)? }
        );
    };

    (@munch $vis:vis $name:ident $vertex:ident;
        decl = {$($decl:tt)*}; init = {$($init:tt)*}; body = {$($body:tt)*}; methods = {$($methods:tt)*};
        rest = { (depend, $fname:ident, $fty:ty, mutable) $(, $($rest:tt)*)? }
    ) => {
        $crate::graph_interface!(@munch $vis $name $vertex;
            decl = {$($decl)*
                pub $fname: ::std::sync::Arc<$crate::engine::dependency::Dependency>,
            };
            init = {$($init)* $fname,};
            body = {$($body)*
                let $fname = match $vertex.named_dependency(stringify!($fname)) {
                    ::std::option::Option::Some(dependency) => dependency,
                    ::std::option::Option::None => return ::std::result::Result::Err(-1),
                };
                $fname.declare_mutable(true);
                $fname.declare_essential($crate::engine::dependency::EssentialLevel::Required);
                if !$fname.declare_type::<$fty>() {
                    return ::std::result::Result::Err(-1);
                }
            };
            methods = {$($methods)*
                pub fn $fname(&self) -> ::std::option::Option<$crate::engine::value::ValueMut<$fty>> {
                    self.$fname.mutable_value::<$fty>()
                }
            };
            rest = { $($($rest)*)? }
        );
    };

    (@munch $vis:vis $name:ident $vertex:ident;
        decl = {$($decl:tt)*}; init = {$($init:tt)*}; body = {$($body:tt)*}; methods = {$($methods:tt)*};
        rest = { (depend, $fname:ident, $fty:ty, optional) $(, $($rest:tt)*)? }
    ) => {
        $crate::graph_interface!(@munch $vis $name $vertex;
            decl = {$($decl)*
                pub $fname: ::std::sync::Arc<$crate::engine::dependency::Dependency>,
            };
            init = {$($init)* $fname,};
            body = {$($body)*
                let $fname = match $vertex.named_dependency(stringify!($fname)) {
                    ::std::option::Option::Some(dependency) => dependency,
                    ::std::option::Option::None => return ::std::result::Result::Err(-1),
                };
                $fname.declare_essential($crate::engine::dependency::EssentialLevel::Optional);
                if !$fname.declare_type::<$fty>() {
                    return ::std::result::Result::Err(-1);
                }
            };
            methods = {$($methods)*
                pub fn $fname(&self) -> ::std::option::Option<$crate::engine::value::ValueRef<$fty>> {
                    self.$fname.value::<$fty>()
                }
            };
            rest = { $($($rest)*)? }
        );
    };

    (@munch $vis:vis $name:ident $vertex:ident;
        decl = {$($decl:tt)*}; init = {$($init:tt)*}; body = {$($body:tt)*}; methods = {$($methods:tt)*};
        rest = { (depend, $fname:ident, $fty:ty, skip_if_empty) $(, $($rest:tt)*)? }
    ) => {
        $crate::graph_interface!(@munch $vis $name $vertex;
            decl = {$($decl)*
                pub $fname: ::std::sync::Arc<$crate::engine::dependency::Dependency>,
            };
            init = {$($init)* $fname,};
            body = {$($body)*
                let $fname = match $vertex.named_dependency(stringify!($fname)) {
                    ::std::option::Option::Some(dependency) => dependency,
                    ::std::option::Option::None => return ::std::result::Result::Err(-1),
                };
                $fname.declare_essential($crate::engine::dependency::EssentialLevel::SkipIfEmpty);
                if !$fname.declare_type::<$fty>() {
                    return ::std::result::Result::Err(-1);
                }
            };
            methods = {$($methods)*
                pub fn $fname(&self) -> ::std::option::Option<$crate::engine::value::ValueRef<$fty>> {
                    self.$fname.value::<$fty>()
                }
            };
            rest = { $($($rest)*)? }
        );
    };

    (@munch $vis:vis $name:ident $vertex:ident;
        decl = {$($decl:tt)*}; init = {$($init:tt)*}; body = {$($body:tt)*}; methods = {$($methods:tt)*};
        rest = { (emit, $fname:ident, $fty:ty) $(, $($rest:tt)*)? }
    ) => {
        $crate::graph_interface!(@munch $vis $name $vertex;
            decl = {$($decl)*
                pub $fname: $crate::engine::slot::OutputData<$fty>,
            };
            init = {$($init)* $fname,};
            body = {$($body)*
                let $fname = match $vertex.named_emit(stringify!($fname)) {
                    ::std::option::Option::Some(slot) => {
                        let output = slot.declare_type::<$fty>();
                        if !output.valid() {
                            return ::std::result::Result::Err(-1);
                        }
                        output
                    }
                    ::std::option::Option::None => return ::std::result::Result::Err(-1),
                };
            };
            methods = {$($methods)*};
            rest = { $($($rest)*)? }
        );
    };

    (@munch $vis:vis $name:ident $vertex:ident;
        decl = {$($decl:tt)*}; init = {$($init:tt)*}; body = {$($body:tt)*}; methods = {$($methods:tt)*};
        rest = {}
    ) => {
        $vis struct $name {
            $($decl)*
        }

        impl $name {
            /// Resolves every declared field against the vertex wiring;
            /// call from `Operator::setup` and store the result in the
            /// vertex context.
            $vis fn resolve(
                $vertex: &::std::sync::Arc<$crate::engine::vertex::Vertex>,
            ) -> ::std::result::Result<Self, i32> {
                $($body)*
                ::std::result::Result::Ok(Self { $($init)* })
            }

            $($methods)*
        }
    };
}
