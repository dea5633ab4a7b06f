// Definitions below expand to the same shape for every object: a plain
// struct, `Identifiable`, and field-by-field (de)serialization.

/// A bare constructor: serialized without its id.
macro_rules! tl_type {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl crate::Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        impl crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                $( crate::Serializable::serialize(&self.$field, buf); )*
            }
        }

        impl crate::Deserializable for $name {
            fn deserialize(buf: crate::deserialize::Buffer) -> crate::deserialize::Result<Self> {
                $( let $field = <$ty as crate::Deserializable>::deserialize(buf)?; )*
                Ok(Self { $( $field, )* })
            }
        }
    };
}

/// An RPC function: serialized with its id, answered with `$ret`.
///
/// Functions also deserialize (bare, after the id has been read) so test
/// harnesses can play the server side.
macro_rules! tl_function {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)?
        } -> $ret:ty
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl crate::Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        impl crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                crate::Serializable::serialize(&<Self as crate::Identifiable>::CONSTRUCTOR_ID, buf);
                $( crate::Serializable::serialize(&self.$field, buf); )*
            }
        }

        impl crate::Deserializable for $name {
            fn deserialize(buf: crate::deserialize::Buffer) -> crate::deserialize::Result<Self> {
                $( let $field = <$ty as crate::Deserializable>::deserialize(buf)?; )*
                Ok(Self { $( $field, )* })
            }
        }

        impl crate::RemoteCall for $name {
            type Return = $ret;
        }
    };
}

/// A boxed type: an enum over its constructors, tagged by constructor id.
macro_rules! tl_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $( $variant:ident ( $ty:path ) ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub enum $name {
            $( $variant($ty), )+
        }

        impl crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                use crate::Identifiable;
                match self {
                    $(
                        Self::$variant(x) => {
                            crate::Serializable::serialize(&<$ty>::CONSTRUCTOR_ID, buf);
                            crate::Serializable::serialize(x, buf);
                        }
                    )+
                }
            }
        }

        impl crate::Deserializable for $name {
            fn deserialize(buf: crate::deserialize::Buffer) -> crate::deserialize::Result<Self> {
                use crate::Identifiable;
                let id = <u32 as crate::Deserializable>::deserialize(buf)?;
                $(
                    if id == <$ty>::CONSTRUCTOR_ID {
                        return Ok(Self::$variant(<$ty as crate::Deserializable>::deserialize(buf)?));
                    }
                )+
                Err(crate::deserialize::Error::UnexpectedConstructor { id })
            }
        }

        $(
            impl From<$ty> for $name {
                fn from(x: $ty) -> Self { Self::$variant(x) }
            }
        )+
    };
}
