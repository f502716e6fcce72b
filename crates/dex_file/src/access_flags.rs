use bitflags::bitflags;

bitflags! {
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const BRIDGE = 0x0040;
        const TRANSIENT = 0x0080;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x1_0000;
        const DECLARED_SYNCHRONIZED = 0x2_0000;
    }
}

impl AccessFlags {
    const VISIBILITY: u32 = 0x0007;

    /// No public, private or protected bit: visible inside the package only.
    pub fn is_package_private(self) -> bool {
        self.bits() & Self::VISIBILITY == 0
    }

    /// Static, private and constructor methods live in the direct method list.
    pub fn is_direct_method(self) -> bool {
        self.intersects(Self::STATIC | Self::PRIVATE | Self::CONSTRUCTOR)
    }
}

#[cfg(test)]
mod access_flags_tests {
    use super::*;

    #[test]
    fn it_should_treat_missing_visibility_bits_as_package_private() {
        assert!(AccessFlags::FINAL.is_package_private());
        assert!(!(AccessFlags::PROTECTED | AccessFlags::FINAL).is_package_private());
    }

    #[test]
    fn it_should_keep_unknown_bits_out_when_truncating() {
        let flags = AccessFlags::from_bits_truncate(0x8000_0001);
        assert_eq!(AccessFlags::PUBLIC, flags);
    }

    #[test]
    fn it_should_classify_direct_methods() {
        assert!((AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR).is_direct_method());
        assert!(AccessFlags::PRIVATE.is_direct_method());
        assert!(!(AccessFlags::PUBLIC | AccessFlags::FINAL).is_direct_method());
    }
}
