//! Universal class tag numbers used by LDAP.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Types {
    Boolean = 1,
    Integer = 2,
    OctetString = 4,
    Null = 5,
    Enumerated = 10,
    Sequence = 16,
    Set = 17,
}
