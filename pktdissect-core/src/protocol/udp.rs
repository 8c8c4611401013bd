//! UDP header definition.

use crate::schema::{Accessor, FieldDecl, HeaderDecl, HeaderDefinition, HeaderLength};

/// UDP header.
#[derive(Debug, Clone, Copy)]
pub struct Udp;

impl HeaderDefinition for Udp {
    const NAME: &'static str = "udp";
    const DISPLAY_NAME: &'static str = "UDP";
    const ID: Option<u16> = Some(4);

    fn declare(decl: &mut HeaderDecl) {
        decl.length(HeaderLength::Fixed(8))
            .field(FieldDecl::bytes("src_port", 0, 2))
            .field(FieldDecl::bytes("dst_port", 2, 2))
            .field(FieldDecl::bytes("length", 4, 2).units("bytes"))
            .field(FieldDecl::bytes("checksum", 6, 2))
            // A zero checksum means none was computed.
            .accessor(
                "checksum_description",
                Accessor::text(|view| match view.u16_at(6) {
                    Some(0) => "not computed",
                    Some(_) => "present",
                    None => "unverifiable",
                }),
            );
    }
}
