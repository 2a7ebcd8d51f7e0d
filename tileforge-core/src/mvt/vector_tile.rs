//! Vector tile protobuf messages, proto2 schema 2.1.
//!
//! Hand-maintained `prost` structs for the Mapbox Vector Tile schema, plus
//! the raster payload extension on `Feature` (field 5) carried over from
//! mapnik-compatible tilesets.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Tile {
    #[prost(message, repeated, tag = "3")]
    pub layers: ::prost::alloc::vec::Vec<tile::Layer>,
}

/// Nested message and enum types in `Tile`.
pub mod tile {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Value {
        /// Exactly one of these values must be present in a valid message
        #[prost(string, optional, tag = "1")]
        pub string_value: ::core::option::Option<::prost::alloc::string::String>,
        #[prost(float, optional, tag = "2")]
        pub float_value: ::core::option::Option<f32>,
        #[prost(double, optional, tag = "3")]
        pub double_value: ::core::option::Option<f64>,
        #[prost(int64, optional, tag = "4")]
        pub int_value: ::core::option::Option<i64>,
        #[prost(uint64, optional, tag = "5")]
        pub uint_value: ::core::option::Option<u64>,
        #[prost(sint64, optional, tag = "6")]
        pub sint_value: ::core::option::Option<i64>,
        #[prost(bool, optional, tag = "7")]
        pub bool_value: ::core::option::Option<bool>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Feature {
        #[prost(uint64, optional, tag = "1")]
        pub id: ::core::option::Option<u64>,

        /// Tags of this feature are encoded as repeated pairs of
        /// integers.
        /// A later repeated pair, e.g. tags 0, 1 would be in position 0 and 1,
        /// and a tag of 2, 3 would be in position 2 and 3.
        #[prost(uint32, repeated, tag = "2")]
        pub tags: ::prost::alloc::vec::Vec<u32>,

        /// The type of geometry stored in this feature.
        #[prost(enumeration = "GeomType", optional, tag = "3", default = "Unknown")]
        pub r#type: ::core::option::Option<i32>,

        /// Contains a stream of commands and parameters (vertices).
        #[prost(uint32, repeated, tag = "4")]
        pub geometry: ::prost::alloc::vec::Vec<u32>,

        /// Opaque raster payload attached to this feature.
        #[prost(bytes = "vec", optional, tag = "5")]
        pub raster: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Layer {
        /// Any compliant implementation must first read the version
        /// number encoded in this message and choose the correct
        /// implementation for this version number before proceeding to
        /// decode other parts of this message.
        #[prost(uint32, required, tag = "15", default = "1")]
        pub version: u32,

        #[prost(string, required, tag = "1")]
        pub name: ::prost::alloc::string::String,

        /// The actual features in this tile.
        #[prost(message, repeated, tag = "2")]
        pub features: ::prost::alloc::vec::Vec<Feature>,

        /// Dictionary encoding for keys
        #[prost(string, repeated, tag = "3")]
        pub keys: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,

        /// Dictionary encoding for values
        #[prost(message, repeated, tag = "4")]
        pub values: ::prost::alloc::vec::Vec<Value>,

        /// Although this is an "optional" field it is required by the spec.
        /// See <https://github.com/mapbox/vector-tile-spec/issues/47>
        #[prost(uint32, optional, tag = "5", default = "4096")]
        pub extent: ::core::option::Option<u32>,
    }

    /// `GeomType` is described in section 4.3.4 of the specification
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum GeomType {
        Unknown = 0,
        Point = 1,
        Linestring = 2,
        Polygon = 3,
    }

    impl GeomType {
        /// String value of the enum field names used in the `ProtoBuf`
        /// definition.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Self::Unknown => "UNKNOWN",
                Self::Point => "POINT",
                Self::Linestring => "LINESTRING",
                Self::Polygon => "POLYGON",
            }
        }
    }

    impl Layer {
        /// Grid resolution of this layer, defaulting per the spec.
        #[must_use]
        pub fn extent_or_default(&self) -> u32 {
            match self.extent {
                Some(0) | None => 4096,
                Some(extent) => extent,
            }
        }
    }
}
