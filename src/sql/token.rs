/// Token types for SQL lexer
use phf::phf_map;

// Perfect hash map for O(1) keyword lookup
static KEYWORDS: phf::Map<&'static str, TokenType> = phf_map! {
    "select" => TokenType::Select,
    "from" => TokenType::From,
    "where" => TokenType::Where,
    "insert" => TokenType::Insert,
    "into" => TokenType::Into,
    "values" => TokenType::Values,
    "update" => TokenType::Update,
    "set" => TokenType::Set,
    "delete" => TokenType::Delete,
    "create" => TokenType::Create,
    "table" => TokenType::Table,
    "view" => TokenType::View,
    "index" => TokenType::Index,
    "drop" => TokenType::Drop,
    "call" => TokenType::Call,
    "and" => TokenType::And,
    "or" => TokenType::Or,
    "not" => TokenType::Not,
    "like" => TokenType::Like,
    "in" => TokenType::In,
    "between" => TokenType::Between,
    "is" => TokenType::Is,
    "null" => TokenType::Null,
    "as" => TokenType::As,
    "order" => TokenType::Order,
    "by" => TokenType::By,
    "asc" => TokenType::Asc,
    "desc" => TokenType::Desc,
    "limit" => TokenType::Limit,
    "offset" => TokenType::Offset,
    "distinct" => TokenType::Distinct,
    "all" => TokenType::All,
    "group" => TokenType::Group,
    "having" => TokenType::Having,
    "join" => TokenType::Join,
    "left" => TokenType::Left,
    "right" => TokenType::Right,
    "inner" => TokenType::Inner,
    "outer" => TokenType::Outer,
    "full" => TokenType::Full,
    "cross" => TokenType::Cross,
    "on" => TokenType::On,
    "union" => TokenType::Union,
    "with" => TokenType::With,
    "exists" => TokenType::Exists,
    "case" => TokenType::Case,
    "when" => TokenType::When,
    "then" => TokenType::Then,
    "else" => TokenType::Else,
    "end" => TokenType::End,
    "primary" => TokenType::Primary,
    "true" => TokenType::True,
    "false" => TokenType::False,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // Keywords
    Select,
    From,
    Where,
    Insert,
    Into,
    Values,
    Update,
    Set,
    Delete,
    Create,
    Table,
    View,
    Index,
    Drop,
    Call,
    And,
    Or,
    Not,
    Like,
    In,
    Between,
    Is,
    Null,
    As,
    Order,
    By,
    Asc,
    Desc,
    Limit,
    Offset,
    Distinct,
    All,
    Group,
    Having,
    Join,
    Left,
    Right,
    Inner,
    Outer,
    Full,
    Cross,
    On,
    Union,
    With,
    Exists,
    Case,
    When,
    Then,
    Else,
    End,
    Primary,

    // Operators
    Eq,           // =
    Ne,           // != or <>
    Lt,           // <
    Gt,           // >
    Le,           // <=
    Ge,           // >=
    NullSafeEq,   // <=>
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    Percent,      // %
    Concat,       // ||
    Arrow,        // ->
    LongArrow,    // ->>

    // Delimiters
    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,

    // Literals
    /// Raw numeric text; the parser decides integer/decimal/float
    Number(String),
    String(String),
    Identifier(String),
    /// Identifier written with dialect quotes; never a keyword
    QuotedIdentifier(String),
    /// `@name`, `:name`, `?name` or a bare `?`
    Parameter(String),
    True,
    False,

    // Special
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub line: usize,
    pub column: usize,
    /// Byte offset of the token start in the source text
    pub offset: usize,
}

impl Token {
    pub fn new(token_type: TokenType, line: usize, column: usize, offset: usize) -> Self {
        Self {
            token_type,
            line,
            column,
            offset,
        }
    }
}

impl TokenType {
    /// Check if this token is a keyword (O(1) perfect hash lookup)
    pub fn from_keyword(s: &str) -> Option<Self> {
        // Convert to lowercase for case-insensitive matching
        let lowercase = s.to_lowercase();
        KEYWORDS.get(lowercase.as_str()).cloned()
    }
}
