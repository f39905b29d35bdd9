//! Identities of shareable render inputs.
//!
//! Shader classes, coats and meshes are shared by many scene nodes. GPU objects
//! are cached per identity, so every one of them gets a process-unique key when
//! it is constructed. Names are only labels and may repeat.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

macro_rules! resource_key {
    ($(#[$meta:meta])* $name:ident, $counter:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        static $counter: AtomicU64 = AtomicU64::new(1);

        impl $name {
            /// Mint a key that no other live value of this kind carries.
            pub fn next() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

resource_key!(
    /// Identity of a [`ShaderClass`](crate::data_structures::material::ShaderClass).
    ShaderKey,
    NEXT_SHADER_KEY,
    "shader"
);
resource_key!(
    /// Identity of a [`Coat`](crate::data_structures::material::Coat).
    CoatKey,
    NEXT_COAT_KEY,
    "coat"
);
resource_key!(
    /// Identity of a [`MeshData`](crate::data_structures::mesh::MeshData).
    MeshKey,
    NEXT_MESH_KEY,
    "mesh"
);

impl ShaderKey {
    /// Reserved for the identity-encoding program of the pick pass.
    ///
    /// The counter starts at one, so minted keys never collide with it.
    pub const IDENTITY_ENCODING: ShaderKey = ShaderKey(0);
}
